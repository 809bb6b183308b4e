use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::service::AuthService;

/// Spawn the two background maintenance loops: the expiry sweep, which
/// soft-revokes tokens past their expiry, and the rotation-due sweep,
/// which flags tokens whose auto-rotation interval has elapsed. Both
/// run until the shutdown channel is signalled. A failing tick is
/// logged and retried on the next interval; it never kills the loop.
pub fn spawn_sweeps(
    service: Arc<AuthService>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let expiry = {
        let service = Arc::clone(&service);
        let shutdown = shutdown.clone();
        tokio::spawn(run_sweep(
            "expiry",
            Duration::from_secs(service.config.expiry_sweep_interval),
            shutdown,
            move || service.sweep_expired(),
        ))
    };

    let rotation = tokio::spawn(run_sweep(
        "rotation",
        Duration::from_secs(service.config.rotation_sweep_interval),
        shutdown,
        {
            let service = Arc::clone(&service);
            move || service.sweep_rotation_due()
        },
    ));

    vec![expiry, rotation]
}

async fn run_sweep<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Result<u64, crate::service::AuthError> + Send + 'static,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; run one sweep at startup so a
    // restart catches up on anything that came due while down.
    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Err(e) = tick() {
                    error!(sweep = name, error = %e, "sweep tick failed");
                }
            }
            _ = shutdown.changed() => {
                info!(sweep = name, "sweep loop stopped");
                return;
            }
        }
    }
}
