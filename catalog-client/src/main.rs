//! catalog-admin console entry point.

use catalog_client::commands::{self, Command};
use catalog_client::config::ClientConfig;
use catalog_client::error::ClientError;
use catalog_client::events::ConsoleEvent;
use catalog_client::notifications::NotificationLevel;
use catalog_client::session::Session;
use catalog_client::view::{CatalogView, RenderState, ViewUpdate};
use catalog_core::Record;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    init_tracing(&config)?;

    let session = Session::connect(&config)?;
    let mut view = session.mount_view();

    let (event_tx, mut event_rx) = mpsc::channel::<ConsoleEvent>(64);
    spawn_input_reader(event_tx);
    println!("{}", commands::HELP);

    let mut view_open = true;
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => match event {
                ConsoleEvent::Input(line) => {
                    if handle_line(&session, &mut view, &line).await {
                        break;
                    }
                }
                ConsoleEvent::InputClosed => break,
            },
            update = view.next_update(), if view_open => match update {
                Some(update) => report_update(&view, &update),
                None => view_open = false,
            },
            else => break,
        }
        print_notifications(&view);
    }

    view.unmount();
    session.logout();
    Ok(())
}

fn init_tracing(config: &ClientConfig) -> Result<(), ClientError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)))
        .map_err(|err| ClientError::Logging(err.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ClientError::Logging(err.to_string()))
}

fn spawn_input_reader(sender: mpsc::Sender<ConsoleEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if sender.blocking_send(ConsoleEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to read input");
                    break;
                }
            }
        }
        let _ = sender.blocking_send(ConsoleEvent::InputClosed);
    });
}

/// Returns `true` when the operator asked to quit.
async fn handle_line(session: &Session, view: &mut CatalogView, line: &str) -> bool {
    let command = match commands::parse_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return false,
        Err(err) => {
            println!("{err}");
            return false;
        }
    };

    match command {
        Command::Quit => return true,
        Command::Help => println!("{}", commands::HELP),
        Command::List => print_records(view),
        Command::Add(input) => {
            if let Ok(record) = view.create_record(input).await {
                println!("created {}", record.id);
            }
        }
        Command::Edit { id, input } => {
            let _ = view.update_record(&id, input).await;
        }
        Command::Toggle(id) => {
            if let Ok(record) = view.toggle_status(&id).await {
                println!("{} is now {}", record.id, record.status);
            }
        }
        Command::Delete(id) => {
            let _ = view.delete_record(&id).await;
        }
        Command::Stats => match session.gateway().analytics_overview().await {
            Ok(overview) => {
                for entry in &overview.by_status {
                    println!("{:<10} {}", entry.status, entry.count);
                }
                for entry in &overview.by_category {
                    println!("{:<10} {}", entry.category, entry.count);
                }
                println!("inventory value: {:.2}", overview.total_inventory_value);
            }
            Err(err) => println!("{}", err.user_message()),
        },
        Command::Refresh => {
            if !view.refresh() {
                println!("refresh already running");
            }
        }
        Command::Resubscribe => view.resubscribe(),
    }
    false
}

fn report_update(view: &CatalogView, update: &ViewUpdate) {
    debug!(view = %view.id(), update = ?update, "View updated");
    match update {
        ViewUpdate::LiveStatus(status) => println!("live: {status}"),
        ViewUpdate::LiveSnapshot { .. } | ViewUpdate::Cache => print_records(view),
        // reported through the notification queue
        ViewUpdate::LiveFailed(_) => {}
    }
}

fn print_records(view: &CatalogView) {
    let (source, records) = view.selection();
    match view.render_state() {
        RenderState::Loading => println!("loading..."),
        RenderState::Failed(message) => println!("{message}"),
        RenderState::Empty => println!("no records ({source:?}, live {})", view.live_status()),
        RenderState::Rows(count) => {
            println!("{count} records ({source:?}, live {})", view.live_status());
            for record in &records {
                println!("{}", format_record(record));
            }
        }
    }
}

fn format_record(record: &Record) -> String {
    format!(
        "{:<24} {:<24} {:>10.2} {:<8} {:<12} {}",
        record.id,
        record.name,
        record.price,
        record.status,
        record.category.as_deref().unwrap_or("-"),
        record
            .stock
            .map(|stock| stock.to_string())
            .unwrap_or_else(|| "-".to_string()),
    )
}

fn print_notifications(view: &CatalogView) {
    for notice in view.drain_notifications() {
        let prefix = match notice.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
            NotificationLevel::Success => "ok",
        };
        match notice.action {
            Some(action) => println!("[{prefix}] {} ({action:?})", notice.message),
            None => println!("[{prefix}] {}", notice.message),
        }
    }
}
