//! Pipeline controller.
//!
//! Owns the source, sink, transform and window, drives the cooperative
//! step loop, evaluates stop conditions and runs the shutdown sequence.
//! The loop never blocks: connection setup and the final flush are the
//! only suspension points beyond the short idle yield.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::error::EngineError;
use super::stats::PipelineStats;
use super::stop::{StopConditions, StopReason};
use crate::config::{CallbackConfig, EndpointConfig, EngineConfig};
use crate::control::{spawn_signal_listener, PidFile, QuitFlag};
use crate::dirq::QueueDir;
use crate::message::Message;
use crate::sink::{
    BrokerSink, DirQueueSink, MessageSink, SendOutcome, SendToken,
};
use crate::source::{BrokerSource, DeliveryTag, DirQueueSource, MessageSource, Step};
use crate::transform::{self, Identity, Transform, Verdict};
use crate::window::{Outcome, Window};

/// Cooperative yield while the source is idle or the window is saturated.
const IDLE_YIELD: Duration = Duration::from_millis(20);

/// Minimum spacing between PID-file sentinel reads.
const PIDFILE_POLL: Duration = Duration::from_millis(250);

/// Delay before the single reconnect attempt allowed at zero receipts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Poll spacing while draining the window during shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The stop condition that ended the run.
    pub reason: StopReason,
    /// Final counter values.
    pub stats: PipelineStats,
}

/// Drives one source → transform → sink pipeline to completion.
pub struct Controller {
    config: EngineConfig,
    source: Box<dyn MessageSource>,
    sink: Box<dyn MessageSink>,
    transform: Box<dyn Transform>,
    callback_data: Vec<String>,
    window: Window,
    pending: VecDeque<(u64, SendToken)>,
    stats: PipelineStats,
    quit: QuitFlag,
    pidfile: Option<PidFile>,
    signal_listener: Option<JoinHandle<()>>,
    sink_started: bool,
    admitted: u64,
    retried_connect: bool,
}

impl Controller {
    /// Build a controller from a validated configuration, constructing the
    /// concrete endpoints and transform it names.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let source = build_source(&config)?;
        let sink = build_sink(&config)?;
        let (transform, callback_data) = build_transform(config.callback.as_ref())?;
        Ok(Self::assemble(config, source, sink, transform, callback_data))
    }

    /// Build a controller around caller-supplied components. Used by the
    /// test suites and by embedders with custom endpoints; the endpoint
    /// fields of `config` are ignored.
    pub fn with_components(
        config: EngineConfig,
        source: Box<dyn MessageSource>,
        sink: Box<dyn MessageSink>,
        transform: Box<dyn Transform>,
    ) -> Self {
        let callback_data = config
            .callback
            .as_ref()
            .map(|c| c.data.clone())
            .unwrap_or_default();
        Self::assemble(config, source, sink, transform, callback_data)
    }

    fn assemble(
        config: EngineConfig,
        source: Box<dyn MessageSource>,
        sink: Box<dyn MessageSink>,
        transform: Box<dyn Transform>,
        callback_data: Vec<String>,
    ) -> Self {
        let window = Window::new(config.window);
        Self {
            config,
            source,
            sink,
            transform,
            callback_data,
            window,
            pending: VecDeque::new(),
            stats: PipelineStats::new(),
            quit: QuitFlag::new(),
            pidfile: None,
            signal_listener: None,
            sink_started: false,
            admitted: 0,
            retried_connect: false,
        }
    }

    /// The quit flag; setting it stops the engine at the next step.
    pub fn quit_flag(&self) -> QuitFlag {
        self.quit.clone()
    }

    /// Run the pipeline to completion.
    ///
    /// Returns the stop reason and final counters on clean termination;
    /// fatal errors run the shutdown sequence before surfacing.
    pub async fn run(mut self) -> Result<RunReport, EngineError> {
        if let Err(e) = self.startup().await {
            self.teardown();
            return Err(e);
        }
        match self.step_loop().await {
            Ok(reason) => {
                info!(reason = %reason, "stopping");
                self.shutdown().await;
                self.teardown();
                Ok(RunReport {
                    reason,
                    stats: self.stats.clone(),
                })
            }
            Err(e) => {
                warn!(error = %e, "fatal error; shutting down");
                self.shutdown().await;
                self.teardown();
                Err(e)
            }
        }
    }

    async fn startup(&mut self) -> Result<(), EngineError> {
        if let Some(path) = self.config.pidfile.clone() {
            self.pidfile = Some(PidFile::create(path)?);
        }
        self.signal_listener = Some(spawn_signal_listener(self.quit.clone()));

        let data = std::mem::take(&mut self.callback_data);
        self.transform
            .start(&data)
            .map_err(EngineError::TransformStart)?;

        self.source.start().await?;
        if !self.config.lazy {
            self.sink.start().await?;
            self.sink_started = true;
        }
        self.stats = PipelineStats::new();
        debug!(window = self.config.window, lazy = self.config.lazy, "pipeline started");
        Ok(())
    }

    async fn step_loop(&mut self) -> Result<StopReason, EngineError> {
        let conditions = StopConditions::new(
            self.config.count,
            self.config.duration,
            self.config.timeout_inactivity,
        );
        let started = Instant::now();
        let mut last_receipt = started;
        let mut last_pidfile_check = Instant::now();

        loop {
            // 1. Stop conditions.
            if let Some(pidfile) = &self.pidfile {
                if last_pidfile_check.elapsed() >= PIDFILE_POLL {
                    last_pidfile_check = Instant::now();
                    if pidfile.quit_requested() {
                        self.quit.set();
                    }
                }
            }
            if let Some(reason) = conditions.check(self.stats.acked, started, last_receipt, &self.quit)
            {
                return Ok(reason);
            }

            // 2. Receive, unless the window (or the count budget) is full.
            let may_admit = !self.window.is_full()
                && self.config.count.map_or(true, |c| self.admitted < c);
            let mut idle = false;
            if may_admit {
                match self.source.step().await {
                    Ok(Step::Received(message, tag)) => {
                        last_receipt = Instant::now();
                        self.receive(message, tag).await?;
                    }
                    Ok(Step::Idle) => {
                        self.transform.idle();
                        idle = true;
                    }
                    Ok(Step::Exhausted) => {
                        debug!("source exhausted");
                        return Ok(StopReason::SourceExhausted);
                    }
                    Err(e)
                        if e.is_transport()
                            && self.stats.received == 0
                            && !self.retried_connect =>
                    {
                        warn!(error = %e, "transport error before first receipt; retrying once");
                        self.retried_connect = true;
                        if let Err(stop_err) = self.source.stop().await {
                            debug!(error = %stop_err, "source stop during retry");
                        }
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                        self.source.start().await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            // 3. Poll outstanding send tokens.
            let resolved = self.poll_tokens()?;

            // 4. Release resolved heads back to the source.
            let drained = self.drain_acks().await?;

            if idle || (!may_admit && resolved == 0 && drained == 0) {
                tokio::time::sleep(IDLE_YIELD).await;
            }
        }
    }

    /// Handle one received message: admit, transform, dispatch.
    async fn receive(&mut self, message: Message, tag: DeliveryTag) -> Result<(), EngineError> {
        self.stats.received += 1;
        self.stats.bytes_received += message.body_len() as u64;
        self.admitted += 1;
        let seq = self.window.admit(tag)?;

        match self.transform.check(message) {
            Ok(Verdict::Forward(message)) => {
                self.ensure_sink_started().await?;
                let token = self.sink.send(message).await?;
                self.pending.push_back((seq, token));
            }
            Ok(Verdict::Drop(reason)) => {
                info!(reason = %reason, "message dropped");
                self.stats.dropped += 1;
                self.window.complete(seq, Outcome::Dropped)?;
            }
            Err(e) => {
                warn!(error = %e, "transform failed; dropping message");
                self.stats.dropped += 1;
                self.window.complete(seq, Outcome::Dropped)?;
            }
        }
        Ok(())
    }

    async fn ensure_sink_started(&mut self) -> Result<(), EngineError> {
        if !self.sink_started {
            debug!("starting sink on first send");
            self.sink.start().await?;
            self.sink_started = true;
        }
        Ok(())
    }

    /// Non-blocking sweep over outstanding tokens. A failed token is fatal
    /// and leaves its window entry Pending, so the message is never acked.
    fn poll_tokens(&mut self) -> Result<usize, EngineError> {
        let mut resolved = 0;
        let mut index = 0;
        while index < self.pending.len() {
            let outcome = match self.pending.get_mut(index) {
                Some((_, token)) => token.try_complete(),
                None => break,
            };
            match outcome {
                Some(SendOutcome::Accepted) => {
                    if let Some((seq, _)) = self.pending.remove(index) {
                        self.stats.sent += 1;
                        self.window.complete(seq, Outcome::Sent)?;
                        resolved += 1;
                    }
                }
                Some(SendOutcome::Failed(reason)) => {
                    return Err(EngineError::SendFailed(reason));
                }
                None => index += 1,
            }
        }
        Ok(resolved)
    }

    /// FIFO drain: acknowledge every resolved head entry to the source.
    async fn drain_acks(&mut self) -> Result<usize, EngineError> {
        let tags = self.window.drain();
        if tags.is_empty() {
            return Ok(0);
        }
        self.source.ack_run(&tags).await?;
        self.stats.acked += tags.len() as u64;
        Ok(tags.len())
    }

    /// The shutdown sequence: stop admitting, drain within the linger
    /// budget, flush the sink, tear components down in reverse order.
    async fn shutdown(&mut self) {
        if let Err(e) = self.source.stop().await {
            warn!(error = %e, "source stop failed");
        }

        let deadline = Instant::now() + self.config.timeout_linger;
        while !self.window.is_empty() && Instant::now() < deadline {
            match self.poll_tokens() {
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "send failed during shutdown drain");
                    break;
                }
            }
            if let Err(e) = self.drain_acks().await {
                warn!(error = %e, "ack failed during shutdown drain");
                break;
            }
            if self.window.is_empty() {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        if !self.window.is_empty() {
            // Entries still pending are left unacknowledged; the source
            // side redelivers them on the next run.
            info!(
                outstanding = self.window.outstanding(),
                "linger elapsed with entries outstanding"
            );
        }

        if self.sink_started {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = self.sink.flush(remaining).await {
                warn!(error = %e, "sink flush failed");
            }
        }

        self.transform.stop();
        if let Err(e) = self.sink.stop().await {
            warn!(error = %e, "sink stop failed");
        }

        if self.config.statistics {
            self.stats.report();
        }
    }

    fn teardown(&mut self) {
        if let Some(listener) = self.signal_listener.take() {
            listener.abort();
        }
        self.pidfile = None;
    }
}

fn build_source(config: &EngineConfig) -> Result<Box<dyn MessageSource>, EngineError> {
    match &config.incoming {
        EndpointConfig::Broker(endpoint) => Ok(Box::new(BrokerSource::new(
            endpoint.clone(),
            config.subscriptions.clone(),
            config.effective_prefetch(),
            config.reliable,
            config.timeout_connect,
        ))),
        EndpointConfig::Queue(endpoint) => {
            let dirq = QueueDir::open(&endpoint.path)?;
            Ok(Box::new(DirQueueSource::new(
                dirq,
                config.loop_rescan,
                config.remove,
            )))
        }
    }
}

fn build_sink(config: &EngineConfig) -> Result<Box<dyn MessageSink>, EngineError> {
    match &config.outgoing {
        EndpointConfig::Broker(endpoint) => Ok(Box::new(BrokerSink::new(
            endpoint.clone(),
            config.reliable,
            config.timeout_connect,
        ))),
        EndpointConfig::Queue(endpoint) => {
            let dirq = QueueDir::open(&endpoint.path)?;
            Ok(Box::new(DirQueueSink::new(dirq)))
        }
    }
}

fn build_transform(
    callback: Option<&CallbackConfig>,
) -> Result<(Box<dyn Transform>, Vec<String>), EngineError> {
    match callback {
        Some(callback) => {
            let transform = transform::build(&callback.name).map_err(EngineError::Config)?;
            Ok((transform, callback.data.clone()))
        }
        None => Ok((Box::new(Identity), Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueEndpoint;
    use crate::message::Message;
    use crate::sink::{MemorySink, MemorySinkHandle};
    use crate::source::{MemorySource, MemorySourceHandle};
    use crate::transform::{HeaderFilter, TransformError};

    fn test_config() -> EngineConfig {
        // Endpoint fields are unused with `with_components`.
        let endpoint = |p: &str| {
            EndpointConfig::Queue(QueueEndpoint {
                path: p.into(),
            })
        };
        let mut config = EngineConfig::new(endpoint("/unused/in"), endpoint("/unused/out"));
        config.timeout_linger = Duration::from_secs(2);
        config
    }

    fn msg(n: u32) -> Message {
        Message::new(format!("body-{n}").into_bytes()).with_header("n", n.to_string())
    }

    fn messages(count: u32) -> Vec<Message> {
        (0..count).map(msg).collect()
    }

    struct Pipeline {
        controller: Controller,
        source: MemorySourceHandle,
        sink: MemorySinkHandle,
    }

    fn pipeline(
        config: EngineConfig,
        preload: Vec<Message>,
        exhaust: bool,
        transform: Box<dyn Transform>,
    ) -> Pipeline {
        let (source, source_handle) = MemorySource::new(preload, exhaust);
        let (sink, sink_handle) = MemorySink::new();
        let controller =
            Controller::with_components(config, Box::new(source), Box::new(sink), transform);
        Pipeline {
            controller,
            source: source_handle,
            sink: sink_handle,
        }
    }

    #[tokio::test]
    async fn test_exhausted_source_drains_everything() {
        let p = pipeline(test_config(), messages(5), true, Box::new(Identity));
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.reason, StopReason::SourceExhausted);
        assert_eq!(report.stats.received, 5);
        assert_eq!(report.stats.sent, 5);
        assert_eq!(report.stats.acked, 5);
        assert_eq!(p.sink.accepted_len(), 5);
        assert_eq!(p.source.acked(), vec![0, 1, 2, 3, 4]);
        assert!(p.sink.flushed());
        assert!(p.sink.stopped());
    }

    #[tokio::test]
    async fn test_count_stop_acks_exactly_count() {
        let mut config = test_config();
        config.count = Some(3);
        let p = pipeline(config, messages(10), false, Box::new(Identity));
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.reason, StopReason::CountReached);
        assert_eq!(report.stats.acked, 3);
        assert_eq!(p.source.acked(), vec![0, 1, 2]);
        assert_eq!(p.sink.accepted_len(), 3);
        // Unadmitted messages stay with the source.
        assert_eq!(p.source.yielded(), 3);
    }

    #[tokio::test]
    async fn test_filter_drops_are_acked_and_logged() {
        // Scenario: 20 messages, 7 low priority, transform drops the low
        // ones; the sink sees 13 and every tag is acked.
        let mut batch = Vec::new();
        for n in 0..20u32 {
            let priority = if n % 3 == 0 { "low" } else { "high" };
            batch.push(msg(n).with_header("priority", priority));
        }
        let low_count = batch
            .iter()
            .filter(|m| m.header("priority") == Some("low"))
            .count() as u64;
        assert_eq!(low_count, 7);

        let mut config = test_config();
        config.callback = Some(CallbackConfig {
            name: "header-filter".to_string(),
            data: vec!["priority=low".to_string(), "reason=skip".to_string()],
        });
        let p = pipeline(config, batch, true, Box::new(HeaderFilter::default()));
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.stats.received, 20);
        assert_eq!(report.stats.dropped, 7);
        assert_eq!(report.stats.sent, 13);
        assert_eq!(report.stats.acked, 20);
        assert_eq!(p.sink.accepted_len(), 13);
        assert_eq!(p.source.acked().len(), 20);
    }

    #[tokio::test]
    async fn test_ack_order_is_receipt_order_under_token_delay() {
        let p = pipeline(test_config(), messages(8), true, Box::new(Identity));
        p.sink.set_token_delay(Duration::from_millis(15));
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.stats.acked, 8);
        assert_eq!(p.source.acked(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_window_saturation_bounds_outstanding() {
        let mut config = test_config();
        config.window = 4;
        config.count = Some(12);
        let p = pipeline(config, messages(40), false, Box::new(Identity));
        p.sink.set_token_delay(Duration::from_millis(25));

        let sink = p.sink.clone();
        let run = tokio::spawn(p.controller.run());
        let mut max_outstanding = 0;
        while !run.is_finished() {
            max_outstanding = max_outstanding.max(sink.outstanding());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let report = run.await.unwrap().unwrap();

        assert!(max_outstanding <= 4, "outstanding peaked at {max_outstanding}");
        assert_eq!(report.reason, StopReason::CountReached);
        assert_eq!(report.stats.acked, 12);
    }

    #[tokio::test]
    async fn test_inactivity_stop_after_drain() {
        let mut config = test_config();
        config.timeout_inactivity = Some(Duration::from_millis(150));
        let p = pipeline(config, messages(5), false, Box::new(Identity));
        let started = Instant::now();
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.reason, StopReason::InactivityTimeout);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(report.stats.acked, 5);
        assert_eq!(p.sink.accepted_len(), 5);
    }

    #[tokio::test]
    async fn test_duration_stop() {
        let mut config = test_config();
        config.duration = Some(Duration::from_millis(120));
        let p = pipeline(config, Vec::new(), false, Box::new(Identity));
        let report = p.controller.run().await.unwrap();
        assert_eq!(report.reason, StopReason::DurationElapsed);
    }

    #[tokio::test]
    async fn test_quit_flag_stops_and_drains() {
        let mut config = test_config();
        config.window = 8;
        let p = pipeline(config, messages(200), false, Box::new(Identity));
        let quit = p.controller.quit_flag();

        let run = tokio::spawn(p.controller.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        quit.set();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.reason, StopReason::QuitRequested);
        // Whatever was acked made it to the sink.
        assert_eq!(report.stats.acked, report.stats.sent + report.stats.dropped);
        assert_eq!(p.sink.accepted_len() as u64, report.stats.sent);
    }

    #[tokio::test]
    async fn test_lazy_sink_starts_on_first_send() {
        let mut config = test_config();
        config.lazy = true;
        let (source, _source_handle) = MemorySource::new(messages(1), true);
        let (sink, sink_handle) = MemorySink::new();
        let controller = Controller::with_components(
            config,
            Box::new(source),
            Box::new(sink),
            Box::new(Identity),
        );
        assert!(!sink_handle.started());
        let report = controller.run().await.unwrap();
        assert!(sink_handle.started());
        assert_eq!(report.stats.sent, 1);
    }

    #[tokio::test]
    async fn test_lazy_sink_never_starts_without_receives() {
        let mut config = test_config();
        config.lazy = true;
        let p = pipeline(config, Vec::new(), true, Box::new(Identity));
        let report = p.controller.run().await.unwrap();
        assert_eq!(report.reason, StopReason::SourceExhausted);
        assert!(!p.sink.started());
        assert!(p.sink.stopped());
    }

    #[tokio::test]
    async fn test_failed_send_is_fatal_and_never_acked() {
        let p = pipeline(test_config(), messages(3), true, Box::new(Identity));
        p.sink.fail_sends();
        let err = p.controller.run().await.unwrap_err();

        assert!(matches!(err, EngineError::SendFailed(_)));
        // Unknown outcomes are never acknowledged.
        assert!(p.source.acked().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_retried_once_at_zero_receipts() {
        let p = pipeline(test_config(), messages(2), true, Box::new(Identity));
        p.source.inject_transport_errors(1);
        let report = p.controller.run().await.unwrap();
        assert_eq!(report.stats.acked, 2);
    }

    #[tokio::test]
    async fn test_transport_error_fatal_after_receipts() {
        let (source, handle) = MemorySource::new(messages(2), false);
        let (sink, _sink_handle) = MemorySink::new();
        let controller = Controller::with_components(
            test_config(),
            Box::new(source),
            Box::new(sink),
            Box::new(Identity),
        );
        // One good yield, then a broken transport: no retry is allowed.
        let run = tokio::spawn(controller.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.inject_transport_errors(10);
        let result = run.await.unwrap();
        assert!(result.is_err());
    }

    struct FailingStart;

    impl Transform for FailingStart {
        fn start(&mut self, _data: &[String]) -> Result<(), TransformError> {
            Err(TransformError::new("bad data"))
        }

        fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
            Ok(Verdict::Forward(message))
        }
    }

    #[tokio::test]
    async fn test_transform_start_failure_aborts() {
        let p = pipeline(test_config(), messages(1), true, Box::new(FailingStart));
        let err = p.controller.run().await.unwrap_err();
        assert!(matches!(err, EngineError::TransformStart(_)));
    }

    struct FlakyCheck;

    impl Transform for FlakyCheck {
        fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
            if message.header("n") == Some("1") {
                Err(TransformError::new("boom"))
            } else {
                Ok(Verdict::Forward(message))
            }
        }
    }

    #[tokio::test]
    async fn test_transform_check_failure_drops_and_continues() {
        let p = pipeline(test_config(), messages(3), true, Box::new(FlakyCheck));
        let report = p.controller.run().await.unwrap();

        assert_eq!(report.stats.received, 3);
        assert_eq!(report.stats.dropped, 1);
        assert_eq!(report.stats.sent, 2);
        assert_eq!(report.stats.acked, 3);
    }

    #[tokio::test]
    async fn test_linger_deadline_leaves_pending_unacked() {
        let mut config = test_config();
        config.count = Some(4);
        config.timeout_linger = Duration::from_millis(50);
        let p = pipeline(config, messages(4), false, Box::new(Identity));
        // Tokens resolve long after the linger budget.
        p.sink.set_token_delay(Duration::from_secs(30));

        let quit = p.controller.quit_flag();
        let run = tokio::spawn(p.controller.run());
        tokio::time::sleep(Duration::from_millis(40)).await;
        quit.set();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.reason, StopReason::QuitRequested);
        assert_eq!(report.stats.acked, 0);
        assert!(p.source.acked().is_empty());
    }
}
