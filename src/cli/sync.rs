use crate::client::SyncOrchestrator;
use crate::core::models::OwnerId;
use crate::core::settings::Settings;
use crate::core::store::TripStore;
use crate::providers::HttpInboxScanner;
use anyhow::Result;
use std::sync::Arc;

/// Kick off an inbox scan and narrate its phases until it settles.
pub async fn run(account: String) -> Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    let store = TripStore::new();
    let scanner = Arc::new(HttpInboxScanner::new(settings.server.base_url.clone()));
    let orchestrator = SyncOrchestrator::new(store, scanner, settings.sync);

    let mut rx = orchestrator.subscribe();
    let account = OwnerId::new(account);

    if let Err(e) = orchestrator.start_sync(&account).await {
        println!("{}", e.user_message());
        return Ok(());
    }

    let mut last_message = String::new();
    let session = orchestrator.session();
    if session.is_syncing {
        println!("{}", session.phase_message);
        last_message = session.phase_message;
    }
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        let session = rx.borrow_and_update().clone();

        if session.is_syncing {
            if session.phase_message != last_message {
                println!("{}", session.phase_message);
                last_message = session.phase_message;
            }
            continue;
        }

        if let Some(outcome) = session.last_outcome {
            println!("{}", outcome.user_message());
        }
        break;
    }

    Ok(())
}
