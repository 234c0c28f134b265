use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::SqliteStore;
use crate::domain::clock::SystemClock;
use crate::monitor::{Monitor, MonitorError, MonitorSettings};

/// Which halves of the process to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Components {
    All,
    ApiOnly,
    SweeperOnly,
}

const STOP_POLL: Duration = Duration::from_millis(250);

/// Runs a sweep every `interval` until `stop_flag` is raised. The first sweep
/// starts immediately.
pub fn start_sweeper(
    monitor: Arc<Monitor>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, AppError> {
    std::thread::Builder::new()
        .name("sweeper".to_string())
        .spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                match monitor.sweep() {
                    Ok(_) => {}
                    Err(MonitorError::SweepAlreadyRunning) => {
                        tracing::debug!("sweep skipped; previous run still active");
                    }
                    Err(error) => tracing::warn!(error = %error, "sweep failed"),
                }

                let next_run = Instant::now() + interval;
                while !stop_flag.load(Ordering::Relaxed) && Instant::now() < next_run {
                    std::thread::sleep(STOP_POLL.min(interval));
                }
            }
        })
        .map_err(AppError::runtime)
}

pub fn run(config: AppConfig, components: Components) -> Result<(), AppError> {
    let mut connection = open_connection(&config.db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;

    let store = SqliteStore::new(Arc::new(Mutex::new(connection)));
    let monitor = Arc::new(Monitor::new(
        store,
        build_notifier(&config)?,
        Arc::new(SystemClock),
        MonitorSettings {
            config_cache_ttl: config.config_cache_ttl(),
            sweep_workers: config.sweep_workers,
        },
    ));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let sweeper_handle = match components {
        Components::All | Components::SweeperOnly => Some(start_sweeper(
            Arc::clone(&monitor),
            config.sweep_interval(),
            Arc::clone(&stop_flag),
        )?),
        Components::ApiOnly => None,
    };

    if components == Components::SweeperOnly {
        tracing::info!(interval_secs = config.sweep_interval_secs, "sweeper running");
        return match sweeper_handle.map(JoinHandle::join) {
            Some(Err(_)) => Err(AppError::runtime("sweeper thread panicked")),
            _ => Ok(()),
        };
    }

    tracing::info!(bind = %config.http_bind, "http server starting");

    let api_state = ApiState {
        monitor: Arc::clone(&monitor),
    };
    let http_bind = config.http_bind.clone();
    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&http_bind)?
        .run()
        .await
    });

    stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = sweeper_handle
        && handle.join().is_err()
    {
        return Err(AppError::runtime("sweeper thread panicked"));
    }

    server_result.map_err(AppError::runtime)
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, AppError> {
    match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "notifications go to webhook");
            let notifier =
                WebhookNotifier::new(url, config.notify_timeout()).map_err(AppError::config)?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::info!("NOTIFY_WEBHOOK_URL not set; notifications are only logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use chrono::Duration as ChronoDuration;

    use crate::domain::models::{DeviceStatus, HeartbeatSource};
    use crate::test_support::{station, test_monitor};

    use super::start_sweeper;

    #[test]
    fn sweeper_marks_silent_device_offline_and_stops_on_flag() {
        let fixture = test_monitor("runtime-sweeper");
        fixture.monitor.register_device(&station("st-1")).expect("register");
        fixture
            .monitor
            .ingest_heartbeat("st-1", HeartbeatSource::Ping)
            .expect("ingest");
        fixture.clock.advance(ChronoDuration::minutes(45));

        let stop_flag = Arc::new(AtomicBool::new(false));
        let handle = start_sweeper(
            Arc::clone(&fixture.monitor),
            Duration::from_millis(20),
            Arc::clone(&stop_flag),
        )
        .expect("sweeper should start");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut status = DeviceStatus::Online;
        while Instant::now() < deadline {
            status = fixture.monitor.get_device("st-1").expect("device").status;
            if status == DeviceStatus::Offline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        stop_flag.store(true, Ordering::Relaxed);
        handle.join().expect("sweeper thread should stop cleanly");

        assert_eq!(status, DeviceStatus::Offline);
        assert_eq!(
            fixture
                .notifier
                .count_with_subject_prefix("[offline]"),
            1
        );
    }
}
