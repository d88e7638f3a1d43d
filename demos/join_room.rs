//! Legacy room listener example.
//!
//! Signs in, joins a room over the legacy socket protocol, prints chat and
//! donation events, and leaves on ctrl-c.
//!
//! Before running, replace the account placeholders below.

use std::error::Error;

use aircast_sdk::auth::SignInAccount;
use aircast_sdk::client::Aircast;
use aircast_sdk::config::{ClientConfig, Country};
use aircast_sdk::live::event::{EventKind, EventPayload};

fn main() -> Result<(), Box<dyn Error>> {
    let account = SignInAccount::Phone("REPLACE_WITH_PHONE_NUMBER".to_string());
    let password = "REPLACE_WITH_PASSWORD";
    let room_id: u64 = 31;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = Aircast::new(ClientConfig::new(Country::Korea))?;
        client.sign_in(account, password).await?;

        let session = client.live_session();
        session.join(room_id).await?;
        println!(
            "joined room {} ({})",
            room_id,
            session.room().map(|room| room.title).unwrap_or_default()
        );

        session.socket().on(EventKind::Message, |envelope| {
            if let EventPayload::Message(event) = &envelope.payload {
                let badge = if event.user.is_moderator { "*" } else { "" };
                println!("{}{}: {}", event.user.nickname, badge, event.text);
            }
        });
        session.socket().on(EventKind::Present, |envelope| {
            if let EventPayload::Present(event) = &envelope.payload {
                println!(
                    "{} sent {} x{}",
                    event.user.nickname, event.sticker, event.amount
                );
            }
        });

        session.message("hello from the rust sdk").ok();

        tokio::signal::ctrl_c().await?;
        session.close(false).await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
