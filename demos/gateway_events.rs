//! Gateway channel listener example.
//!
//! Signs in, connects the shared gateway socket, activates one room's
//! channel and prints every event kind it receives.
//!
//! Before running, replace the account placeholders below.

use std::error::Error;

use aircast_sdk::auth::SignInAccount;
use aircast_sdk::client::Aircast;
use aircast_sdk::config::{ClientConfig, Country};

fn main() -> Result<(), Box<dyn Error>> {
    let account = SignInAccount::Email("REPLACE_WITH_EMAIL".to_string());
    let password = "REPLACE_WITH_PASSWORD";
    let room_id: u64 = 31;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = Aircast::new(ClientConfig::new(Country::Korea))?;
        client.sign_in(account, password).await?;
        client.connect_gateway().await?;

        let session = client.channel_session();
        session.join(room_id).await?;

        session.socket().on_any(|envelope| {
            println!("{:?} on {:?}", envelope.kind, envelope.channel);
        });

        session.message("hello from the rust sdk").await.ok();

        tokio::signal::ctrl_c().await?;
        session.close(false).await?;
        client.disconnect_gateway();
        Ok::<(), Box<dyn Error>>(())
    })
}
