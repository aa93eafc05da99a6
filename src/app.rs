//! Core application runner (business logic) for `beacon-reporter`.
//!
//! This module is intentionally decoupled from process setup (logging,
//! signals, exit codes) so the run loop can be tested deterministically with
//! an injected scanner and publisher.

use crate::advertisement::RawFrame;
use crate::aggregator::Aggregator;
use crate::decoder::beacon::{BeaconFilter, parse_beacon_filter};
use crate::decoder::{self, DecoderSet};
use crate::location::{Location, LocationProvider, parse_location};
use crate::publish::http::HttpMethod;
use crate::publish::{Delivery, PublishError, Publisher};
use crate::report::epoch_millis;
use crate::scanner::{Backend, ScanError};
use clap::Parser;
use reqwest::Url;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Endpoint batches are sent to
    #[arg(long, default_value = "https://localhost/my/endpoint")]
    pub url: Url,

    /// HTTP request method
    #[arg(long, default_value_t, value_enum)]
    pub method: HttpMethod,

    /// Publish interval. Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "30s", value_parser = parse_interval)]
    pub publish_interval: Duration,

    /// Publish every interval, even when the set of devices did not change
    #[arg(long)]
    pub publish_all: bool,

    /// Decode Kontakt.io beacons
    #[arg(long)]
    pub kontakt: bool,

    /// Decode GlobalStar devices
    #[arg(long)]
    pub globalstar: bool,

    /// Decode RuuviTag sensors (RAW and Eddystone-URL formats)
    #[arg(long)]
    pub ruuvi: bool,

    /// Decode iBeacons, optionally only those with the given 32-digit
    /// proximity UUID or a UUID matching the given regular expression
    #[arg(
        long,
        value_name = "UUID|REGEX",
        num_args = 0..=1,
        default_missing_value = "",
        value_parser = parse_beacon_filter
    )]
    pub ibeacon: Option<BeaconFilter>,

    /// Report every advertising device with its name and manufacturer data
    #[arg(long)]
    pub basic_ble: bool,

    /// Enable all decoders
    #[arg(long)]
    pub all: bool,

    /// Fixed gateway location added to every batch.
    /// Format: --location 60.17,24.94
    #[arg(long, value_parser = parse_location)]
    pub location: Option<Location>,

    /// Log every decoded advertisement as JSON
    #[arg(long)]
    pub dump_adv: bool,

    /// Log every published batch as JSON
    #[arg(long)]
    pub dump_publish: bool,

    /// Accept invalid (e.g. self-signed) TLS certificates from the endpoint
    #[arg(long)]
    pub insecure: bool,

    /// Name reported as `detectedBy`, defaults to the host name
    #[arg(long)]
    pub detected_by: Option<String>,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Log level (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Options {
    /// The decoders selected on the command line.
    pub fn decoders(&self) -> Result<DecoderSet, ConfigError> {
        if self.all {
            return Ok(DecoderSet::all());
        }

        let decoders = DecoderSet {
            kontakt: self.kontakt,
            ibeacon: self.ibeacon.clone().unwrap_or_default(),
            globalstar: self.globalstar,
            ruuvi: self.ruuvi,
            basic: self.basic_ble,
        };
        if decoders.is_empty() {
            return Err(ConfigError::NoDecoders);
        }
        Ok(decoders)
    }
}

/// Longest accepted publish interval (one week).
pub const MAX_PUBLISH_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Parse the publish interval. Same syntax as a duration, but zero and
/// anything above [`MAX_PUBLISH_INTERVAL`] are rejected.
///
/// # Examples
/// ```
/// use beacon_reporter::app::parse_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_interval("30").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
/// assert!(parse_interval("0s").is_err());
/// ```
pub fn parse_interval(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, unit) = match src.find(|c: char| !c.is_ascii_digit()) {
        Some(at) => src.split_at(at),
        None => (src, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;

    let too_long = || format!("publish interval too long: {src}");
    let interval = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_long)?),
        "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_long)?),
        other => return Err(format!("invalid duration unit '{other}' in {src}")),
    };

    if interval.is_zero() {
        return Err("publish interval must be greater than zero".to_string());
    }
    if interval > MAX_PUBLISH_INTERVAL {
        return Err(too_long());
    }
    Ok(interval)
}

/// Startup configuration errors.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("no decoders enabled, use --all or select at least one of --kontakt, --globalstar, --ruuvi, --ibeacon, --basic-ble")]
    NoDecoders,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawFrame>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawFrame>, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// The collaborators the run loop talks to.
pub struct Services<'a> {
    pub scanner: &'a dyn Scanner,
    pub publisher: Arc<dyn Publisher>,
    pub location: &'a dyn LocationProvider,
}

type PublishOutcome = Result<Result<Delivery, PublishError>, JoinError>;

fn record_outcome(aggregator: &mut Aggregator, outcome: PublishOutcome) {
    match outcome {
        Ok(Ok(delivery)) => {
            if delivery.is_success() {
                info!(status = delivery.status, body = %delivery.body, "publish succeeded");
            } else {
                warn!(status = delivery.status, body = %delivery.body, "publish answered with non-success status");
            }
            aggregator.publish_succeeded();
        }
        Ok(Err(e)) => {
            error!(error = %e, "publish failed");
            aggregator.publish_failed();
        }
        Err(e) => {
            error!(error = %e, "publish task failed");
            aggregator.publish_failed();
        }
    }
}

/// Run the scan/aggregate/publish loop until `shutdown` resolves or the
/// scanner stops.
///
/// - Every scanned frame is decoded; matches are accumulated per device.
/// - Every `publish_interval` (first one interval after start) the
///   interval's reports are handed to the publisher if the device set
///   changed, in a separate task so slow endpoints do not hold up scanning.
/// - On exit, publishes still in flight are awaited.
pub async fn run_with(
    options: Options,
    detected_by: String,
    services: Services<'_>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let decoders = options.decoders()?;
    info!(
        kontakt = decoders.kontakt,
        ibeacon = %decoders.ibeacon,
        globalstar = decoders.globalstar,
        ruuvi = decoders.ruuvi,
        basic_ble = decoders.basic,
        "decoders"
    );
    info!(
        method = %options.method,
        interval_ms = options.publish_interval.as_millis() as u64,
        publish_all = options.publish_all,
        detected_by = %detected_by,
        "publishing"
    );

    let mut aggregator = Aggregator::new(detected_by.clone(), options.publish_all);
    let mut frames = services.scanner.start_scan(options.backend).await?;
    let mut in_flight: JoinSet<Result<Delivery, PublishError>> = JoinSet::new();

    let period = options.publish_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    warn!("scanner stopped");
                    break;
                };
                let now = epoch_millis(SystemTime::now());
                if let Some(report) = decoder::decode(&frame, &decoders, &detected_by, now) {
                    if options.dump_adv {
                        match serde_json::to_string_pretty(&report) {
                            Ok(json) => info!("advertisement {json}"),
                            Err(e) => warn!(error = %e, "failed to serialize report"),
                        }
                    }
                    aggregator.accumulate(report);
                }
            }

            _ = ticker.tick() => {
                let location = services.location.location();
                match aggregator.drain_if_changed(location, epoch_millis(SystemTime::now())) {
                    Some(batch) => {
                        info!(reports = batch.tags.len(), "publishing");
                        if options.dump_publish {
                            match serde_json::to_string_pretty(&batch) {
                                Ok(json) => info!("batch {json}"),
                                Err(e) => warn!(error = %e, "failed to serialize batch"),
                            }
                        }
                        let publisher = Arc::clone(&services.publisher);
                        in_flight.spawn(async move { publisher.publish(&batch).await });
                    }
                    None => info!("no change"),
                }
            }

            Some(outcome) = in_flight.join_next(), if !in_flight.is_empty() => {
                record_outcome(&mut aggregator, outcome);
            }
        }
    }

    if !in_flight.is_empty() {
        debug!(pending = in_flight.len(), "waiting for in-flight publishes");
    }
    while let Some(outcome) = in_flight.join_next().await {
        record_outcome(&mut aggregator, outcome);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Batch;
    use crate::location::{FixedLocation, NoLocation};
    use crate::mac_address::MacAddress;
    use crate::publish::PublishFuture;
    use crate::test_utils::{TEST_HOST, TEST_MAC, frame_with_data, ruuvi_raw_data};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    /// Sends scheduled frames at the given offsets from start, then keeps
    /// the channel open.
    #[derive(Debug)]
    struct FakeScanner {
        schedule: Mutex<Vec<(Duration, RawFrame)>>,
    }

    impl FakeScanner {
        fn new(schedule: Vec<(Duration, RawFrame)>) -> Self {
            Self {
                schedule: Mutex::new(schedule),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawFrame>, ScanError>> + Send + '_>>
        {
            let schedule = self.schedule.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<RawFrame>(schedule.len().max(1));
                let start = Instant::now();
                tokio::spawn(async move {
                    for (at, frame) in schedule {
                        tokio::time::sleep_until(start + at).await;
                        let _ = tx.send(frame).await;
                    }
                    std::future::pending::<()>().await;
                });
                Ok(rx)
            })
        }
    }

    /// Records batches; fails the deliveries whose index is listed.
    #[derive(Default)]
    struct RecordingPublisher {
        batches: Mutex<Vec<Batch>>,
        fail_on: Vec<usize>,
        calls: AtomicUsize,
    }

    impl Publisher for RecordingPublisher {
        fn publish<'a>(&'a self, batch: &'a Batch) -> PublishFuture<'a> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                self.batches.lock().unwrap().push(batch.clone());
                if self.fail_on.contains(&call) {
                    Err(PublishError::Config("endpoint unreachable".into()))
                } else {
                    Ok(Delivery {
                        status: 200,
                        body: "ok".into(),
                    })
                }
            })
        }
    }

    fn options() -> Options {
        Options::parse_from([
            "beacon-reporter",
            "--ruuvi",
            "--basic-ble",
            "--publish-interval",
            "10s",
        ])
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    async fn run_for(
        options: Options,
        scanner: &FakeScanner,
        publisher: Arc<RecordingPublisher>,
        location: &dyn LocationProvider,
        duration: Duration,
    ) -> Vec<Batch> {
        let services = Services {
            scanner,
            publisher: publisher.clone(),
            location,
        };
        run_with(
            options,
            TEST_HOST.to_string(),
            services,
            tokio::time::sleep(duration),
        )
        .await
        .unwrap();
        publisher.batches.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_first_interval() {
        let scanner = FakeScanner::new(vec![(
            secs(1),
            frame_with_data(TEST_MAC, -60, ruuvi_raw_data()),
        )]);
        let publisher = Arc::new(RecordingPublisher::default());

        let batches = run_for(options(), &scanner, publisher, &NoLocation, secs(15)).await;

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.detected_by, TEST_HOST);
        assert!(batch.location.is_none());
        assert_eq!(batch.tags.len(), 1);
        assert_eq!(batch.tags[0].mac_address, TEST_MAC);
        assert!(batch.tags[0].ruuvi.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_skips_unchanged_device_sets() {
        let scanner = FakeScanner::new(vec![
            (secs(1), frame_with_data(TEST_MAC, -60, ruuvi_raw_data())),
            (secs(11), frame_with_data(TEST_MAC, -61, ruuvi_raw_data())),
            (secs(21), frame_with_data(OTHER_MAC, -70, vec![0x01, 0x02])),
        ]);
        let publisher = Arc::new(RecordingPublisher::default());

        let batches = run_for(options(), &scanner, publisher, &NoLocation, secs(35)).await;

        // t=10 first publish, t=20 unchanged, t=30 different device
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].tags.len(), 1);
        assert_eq!(batches[1].tags[0].mac_address, OTHER_MAC);
        assert_eq!(batches[1].tags[0].manufacturer_data, Some(vec![0x01, 0x02]));
    }

    #[tokio::test(start_paused = true)]
    async fn run_skips_same_device_after_success() {
        let scanner = FakeScanner::new(vec![
            (secs(1), frame_with_data(TEST_MAC, -60, ruuvi_raw_data())),
            (secs(11), frame_with_data(TEST_MAC, -65, ruuvi_raw_data())),
            (secs(21), frame_with_data(TEST_MAC, -70, ruuvi_raw_data())),
        ]);
        let publisher = Arc::new(RecordingPublisher::default());

        let batches = run_for(options(), &scanner, publisher, &NoLocation, secs(35)).await;

        assert_eq!(batches.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_on_next_tick_when_publish_fails() {
        let scanner = FakeScanner::new(vec![
            (secs(1), frame_with_data(TEST_MAC, -60, ruuvi_raw_data())),
            (secs(11), frame_with_data(OTHER_MAC, -60, ruuvi_raw_data())),
            (secs(21), frame_with_data(OTHER_MAC, -60, ruuvi_raw_data())),
            (secs(31), frame_with_data(OTHER_MAC, -60, ruuvi_raw_data())),
        ]);
        let publisher = Arc::new(RecordingPublisher {
            fail_on: vec![1],
            ..Default::default()
        });

        let batches = run_for(options(), &scanner, publisher, &NoLocation, secs(45)).await;

        // t=10 ok, t=20 changed but fails, t=30 same set is retried, t=40 skipped
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].tags[0].mac_address, OTHER_MAC);
        assert_eq!(batches[2].tags[0].mac_address, OTHER_MAC);
    }

    #[tokio::test(start_paused = true)]
    async fn run_publish_all_with_location() {
        let scanner = FakeScanner::new(vec![(
            secs(1),
            frame_with_data(TEST_MAC, -60, ruuvi_raw_data()),
        )]);
        let publisher = Arc::new(RecordingPublisher::default());
        let mut opts = options();
        opts.publish_all = true;

        let batches = run_for(
            opts,
            &scanner,
            publisher,
            &FixedLocation(Location::Searching),
            secs(35),
        )
        .await;

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.location == Some(Location::Searching)));
        assert!(batches[1].tags.is_empty(), "table is reset every interval");
    }

    #[tokio::test(start_paused = true)]
    async fn run_fails_without_decoders() {
        let scanner = FakeScanner::new(vec![]);
        let publisher: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let options = Options::parse_from(["beacon-reporter"]);

        let result = run_with(
            options,
            TEST_HOST.to_string(),
            Services {
                scanner: &scanner,
                publisher,
                location: &NoLocation,
            },
            std::future::ready(()),
        )
        .await;

        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::NoDecoders))
        ));
    }

    #[test]
    fn options_decoder_selection() {
        let all = Options::parse_from(["beacon-reporter", "--all"]).decoders().unwrap();
        assert!(all.kontakt && all.globalstar && all.ruuvi && all.basic);
        assert!(matches!(all.ibeacon, BeaconFilter::Any));

        let bare = Options::parse_from(["beacon-reporter", "--ibeacon"]).decoders().unwrap();
        assert!(matches!(bare.ibeacon, BeaconFilter::Any));
        assert!(!bare.ruuvi);

        let exact = Options::parse_from([
            "beacon-reporter",
            "--ibeacon",
            "f7826da64fa24e988024bc5b71e0893e",
        ])
        .decoders()
        .unwrap();
        assert!(matches!(exact.ibeacon, BeaconFilter::Exact(_)));

        assert!(Options::try_parse_from(["beacon-reporter", "--ibeacon", "("]).is_err());
        assert_eq!(
            Options::parse_from(["beacon-reporter"]).decoders().unwrap_err(),
            ConfigError::NoDecoders
        );
    }

    #[test]
    fn options_defaults() {
        let options = Options::parse_from(["beacon-reporter", "--ruuvi"]);
        assert_eq!(options.publish_interval, Duration::from_secs(30));
        assert_eq!(options.method, HttpMethod::Post);
        assert_eq!(options.url.as_str(), "https://localhost/my/endpoint");
        assert!(options.location.is_none());
        assert!(Options::try_parse_from(["beacon-reporter", "--publish-interval", "0"]).is_err());
    }

    #[test]
    fn parse_interval_units() {
        assert_eq!(parse_interval("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_interval("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval(" 3 s ").unwrap(), Duration::from_secs(3));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("abc").is_err());
        assert!(parse_interval("-1s").is_err());
        assert!(parse_interval("5d").is_err());
        assert!(parse_interval("0ms").is_err());
    }

    #[test]
    fn parse_interval_rejects_overflowing_values() {
        assert_eq!(parse_interval("168h").unwrap(), MAX_PUBLISH_INTERVAL);
        assert!(parse_interval("169h").is_err());
        assert!(parse_interval("18446744073709551615").is_err());
        assert!(parse_interval("5124095576030432h").is_err());
        assert!(parse_interval("307445734561825861m").is_err());
        assert!(parse_interval("99999999999999999999").is_err());
        assert!(
            Options::try_parse_from(["beacon-reporter", "--publish-interval", "18446744073709551615"])
                .is_err()
        );
    }
}
