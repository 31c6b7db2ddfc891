//! Wires the feed, the refresher and the alert loop together and supervises
//! them. None of the tasks is expected to finish on its own: an exit that was
//! not requested through the cancellation token brings the process down. The
//! one exception is a feed losing its socket, which only ends that feed.

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertLoop};
use crate::api::binance::rest::BinanceRest;
use crate::config::Config;
use crate::error::{PairWatchError, Result};
use crate::feed::LiveFeed;
use crate::history::HistoryRefresher;
use crate::model::{ModelSlot, OrdinaryLeastSquares};
use crate::timer::PriceTimer;

pub type TaskSet = JoinSet<(String, Result<()>)>;

pub struct Orchestrator {
    config: Config,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops every task and makes `run` return `Ok`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let instruments = vec![
            config.predictor_symbol.to_uppercase(),
            config.target_symbol.to_uppercase(),
        ];

        let (feed, sessions) = LiveFeed::connect(&config.ws_url, &instruments).await?;
        let models = ModelSlot::new();
        let mut tasks = TaskSet::new();

        for session in sessions {
            let name = format!("{} feed", session.instrument());
            let cancel = self.cancel.clone();
            tasks.spawn(async move { (name, session.run(cancel).await) });
        }

        let refresher = HistoryRefresher::new(
            BinanceRest::new(config.rest_url.clone())?,
            OrdinaryLeastSquares,
            models.clone(),
            instruments[0].clone(),
            instruments[1].clone(),
            config.sample_time,
            config.update_period(),
            config.from_ms(),
            config.to_ms(),
        );
        let cancel = self.cancel.clone();
        tasks.spawn(async move { ("history refresher".to_string(), refresher.run(cancel).await) });

        let (sink, alert_rx) = mpsc::unbounded_channel();
        let alerts = AlertLoop::new(
            feed.reader(&instruments[0])?,
            feed.reader(&instruments[1])?,
            models,
            PriceTimer::new(),
            config.alert_threshold,
            config.alert_window(),
            sink,
        )
        .verbose(config.verbose);
        let cancel = self.cancel.clone();
        tasks.spawn(async move { ("alert loop".to_string(), alerts.run(cancel).await) });

        let cancel = self.cancel.clone();
        tasks.spawn(async move { ("alert output".to_string(), print_alerts(alert_rx, cancel).await) });

        info!("All tasks started");
        supervise(tasks, self.cancel).await
    }
}

/// Writes every alert to stdout, one line each.
async fn print_alerts(mut alerts: mpsc::UnboundedReceiver<Alert>, cancel: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            alert = alerts.recv() => match alert {
                Some(alert) => println!("{}", alert),
                None => return Ok(()),
            },
        }
    }
}

/// Waits for every task. A feed that loses its connection is logged and the
/// rest keep running. Any other unrequested exit cancels the rest and is
/// returned once they have wound down.
pub async fn supervise(mut tasks: TaskSet, cancel: CancellationToken) -> Result<()> {
    let mut failure: Option<PairWatchError> = None;

    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok((name, Ok(()))) if cancel.is_cancelled() => {
                info!("{} stopped", name);
                continue;
            }
            Ok((name, Err(e @ PairWatchError::ConnectionError { .. }))) => {
                error!("{} ended: {}", name, e);
                warn!("Continuing without live updates for that instrument");
                continue;
            }
            Ok((name, Ok(()))) => PairWatchError::TaskExited(name),
            Ok((name, Err(e))) => {
                error!("{} failed: {}", name, e);
                e
            }
            Err(e) => PairWatchError::TaskExited(e.to_string()),
        };

        if failure.is_none() {
            error!("Shutting down: {}", err);
            cancel.cancel();
            failure = Some(err);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
