mod config;
mod logging;

use std::{error::Error, process, sync::Arc};

use mxsync_client::{
    CancellationToken, Client, DefaultSyncProcessor, FileTokenStore, SyncNotice, SyncNotices,
    payloads::ReqLogin,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use config::{CliConfig, Credentials};

#[tokio::main]
async fn main() {
    logging::init();

    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("mxsync: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "mxsync stopped");
        eprintln!("mxsync: {err}");
        process::exit(1);
    }
}

async fn run(config: CliConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    let notices = SyncNotices::default();
    let mut stream = notices.subscribe();

    let client = Client::new(config.client_config()?)?
        .with_store(Arc::new(FileTokenStore::new(&config.state_file)))
        .with_processor(Arc::new(DefaultSyncProcessor::new(notices)));
    let client = Arc::new(client);

    if let Credentials::Password(password) = &config.credentials {
        let mut req = ReqLogin::password(&config.user_id, password);
        req.initial_device_display_name = Some("mxsync".to_owned());
        let login = client.login(&req).await?;
        info!(user_id = %login.user_id, device_id = ?login.device_id, "logged in");
        client.set_credentials(login.user_id, login.access_token);
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping sync");
            ctrl_c_cancel.cancel();
        }
    });

    let sync_client = client.clone();
    let sync_cancel = cancel.clone();
    let mut sync_task = tokio::spawn(async move { sync_client.sync(&sync_cancel).await });

    loop {
        tokio::select! {
            joined = &mut sync_task => {
                let outcome = joined??;
                info!(?outcome, "sync finished");
                return Ok(());
            }
            notice = stream.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    let outcome = sync_task.await??;
    info!(?outcome, "sync finished");
    Ok(())
}

fn print_notice(notice: &SyncNotice) {
    match notice {
        SyncNotice::RoomEvent {
            room_id, event, ..
        } => match event.body() {
            Some(body) => println!("[{room_id}] <{}> {body}", event.sender),
            None => debug!(%room_id, event_type = %event.event_type, "room event"),
        },
        SyncNotice::Status(status) => match status.lag_hint_ms {
            Some(lag_ms) => warn!(lag_ms, "sync degraded; retrying"),
            None => debug!(running = status.running, "sync status"),
        },
        SyncNotice::AccountData(event) | SyncNotice::Presence(event) => {
            debug!(event_type = %event.event_type, sender = %event.sender, "global event");
        }
    }
}
