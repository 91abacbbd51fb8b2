//! RAOP session coordinator
//!
//! [`ProtocolRaop::stream`] runs the single coordinating loop for a session.
//! It waits for a server to hand over a packet, feeds audio through the
//! repairer and decryptor into the pipeline, and turns repairer signals into
//! a discontinuity (drain, then restart with a fresh stream id).
//!
//! Other tasks reach the coordinator only through [`RaopStreamHandle`], which
//! sets flags, interrupts the sockets and wakes the loop. Repairer and
//! pipeline operations happen on the coordinating task alone.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

use super::allocator::{Repairable, RepairableAllocator};
use super::audio_server::{AudioChannel, AudioServer};
use super::config::RaopConfig;
use super::control_server::ControlServer;
use super::decryptor::AudioDecryptor;
use super::discovery::{Fmtp, RaopDiscovery};
use super::repairer::Repairer;
use crate::error::{RendererError, Result, StreamError};
use crate::pipeline::{ID_INVALID, IdProvider, StreamHandler, StreamInfo, Supply, jiffies};
use crate::protocol::rtp::AudioPacket;
use crate::protocol::rtp::constants::SAMPLE_RATE;

/// URI scheme handled by this protocol
pub const SCHEME: &str = "raop";

/// How a call to [`ProtocolRaop::stream`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStreamResult {
    /// Stopped by `try_stop` or `interrupt`
    Stopped,
    /// The sender ended the session
    Success,
    /// The pipeline went away; the stream may be retried
    ErrorRecoverable,
}

/// Session and flush state shared with [`RaopStreamHandle`]
#[derive(Debug)]
struct SessionFlags {
    uri: String,
    session_id: u32,
    stream_id: u32,
    latency: u32,
    /// Sequence number and timestamp of the last requested flush
    flush_point: Option<(u16, u32)>,
    next_flush_id: u32,
    active: bool,
    waiting: bool,
    resume_pending: bool,
    stopped: bool,
    discontinuity: bool,
    starving: bool,
    started: bool,
}

impl SessionFlags {
    fn new(latency: u32) -> Self {
        Self {
            uri: String::new(),
            session_id: 0,
            stream_id: ID_INVALID,
            latency,
            flush_point: None,
            next_flush_id: ID_INVALID,
            active: false,
            waiting: false,
            resume_pending: false,
            stopped: true,
            discontinuity: false,
            starving: false,
            started: false,
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn should_flush(&self, seq: u16, timestamp: u32) -> bool {
        let Some((flush_seq, flush_time)) = self.flush_point else {
            return false;
        };
        if !self.resume_pending {
            return false;
        }
        let seq_in_range = flush_seq.wrapping_sub(seq) as i16 >= 0;
        let time_in_range = flush_time.wrapping_sub(timestamp) as i32 >= 0;
        seq_in_range && time_in_range
    }
}

/// Flags snapshotted and cleared at the top of each loop iteration
#[derive(Debug, Default)]
struct Pending {
    flush_id: Option<u32>,
    stopped: bool,
    waiting: bool,
    discontinuity: bool,
}

struct Shared {
    flags: Mutex<SessionFlags>,
    /// Wakes the coordinating loop
    signal: Arc<Notify>,
    /// Aborts a drain wait when the stream is stopped
    drain_abort: Notify,
    audio: AudioServer,
    control: ControlServer,
    ids: Arc<IdProvider>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupt the sockets only; the repairer and pipeline belong to the
    /// coordinating task
    fn do_interrupt(&self, interrupt: bool) {
        self.audio.interrupt(interrupt);
        self.control.interrupt(interrupt);
    }

    fn start_servers(&self) {
        self.audio.open();
        self.control.open();
    }

    fn stop_servers(&self) {
        self.control.close();
        self.audio.close();
    }
}

/// Handle used by the pipeline and the host to control a running stream
#[derive(Clone)]
pub struct RaopStreamHandle {
    shared: Arc<Shared>,
}

impl RaopStreamHandle {
    /// Request a flush of everything up to `seq`/`time`
    ///
    /// Returns the flush id the pipeline will see, or `None` if no stream is
    /// active. A flush that has not been output yet is reused.
    pub fn send_flush(&self, seq: u16, time: u32) -> Option<u32> {
        let mut flags = self.shared.lock();
        if !flags.active {
            tracing::debug!(seq, time, "flush ignored, stream inactive");
            return None;
        }

        flags.flush_point = Some((seq, time));
        if flags.next_flush_id == ID_INVALID {
            flags.next_flush_id = self.shared.ids.next_flush_id();
            flags.waiting = true;
        }
        let flush_id = flags.next_flush_id;
        drop(flags);

        tracing::debug!(seq, time, flush_id, "send flush");
        self.shared.do_interrupt(true);
        self.shared.signal.notify_one();
        Some(flush_id)
    }

    /// Stop the stream (`true`) or re-arm the sockets (`false`)
    pub fn interrupt(&self, interrupt: bool) {
        tracing::debug!(interrupt, "interrupt");
        if interrupt {
            self.shared.lock().stopped = true;
            self.shared.do_interrupt(true);
            self.shared.signal.notify_one();
            self.shared.drain_abort.notify_waiters();
        } else {
            self.shared.do_interrupt(false);
        }
    }

    /// Whether a stream is running and its servers are open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// Current stream id, or [`ID_INVALID`]
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        self.shared.lock().stream_id
    }

    /// Session id (the sender's SSRC), or 0 before the first packet
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.shared.lock().session_id
    }

    /// Latency in samples last passed to the pipeline
    #[must_use]
    pub fn latency(&self) -> u32 {
        self.shared.lock().latency
    }

    /// Local address of the audio channel
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address cannot be read.
    pub fn audio_addr(&self) -> std::io::Result<SocketAddr> {
        self.shared.audio.local_addr()
    }

    /// Local address of the control channel
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address cannot be read.
    pub fn control_addr(&self) -> std::io::Result<SocketAddr> {
        self.shared.control.local_addr()
    }
}

impl StreamHandler for RaopStreamHandle {
    fn try_stop(&self, stream_id: u32) -> Option<u32> {
        let mut flags = self.shared.lock();
        if !flags.active || stream_id == ID_INVALID || stream_id != flags.stream_id {
            return None;
        }
        if flags.stopped {
            // Already stopping; hand back the flush that has not been output
            return (flags.next_flush_id != ID_INVALID).then_some(flags.next_flush_id);
        }

        if flags.next_flush_id == ID_INVALID {
            flags.next_flush_id = self.shared.ids.next_flush_id();
        }
        flags.stopped = true;
        let flush_id = flags.next_flush_id;
        drop(flags);

        tracing::debug!(stream_id, flush_id, "try stop");
        self.shared.do_interrupt(true);
        self.shared.signal.notify_one();
        Some(flush_id)
    }

    fn notify_starving(&self, mode: &str, stream_id: u32, starving: bool) {
        tracing::debug!(mode, stream_id, starving, "notify starving");
        if starving {
            self.shared.lock().starving = true;
            self.shared.do_interrupt(true);
            self.shared.signal.notify_one();
        }
    }
}

/// RAOP protocol: owns the session servers, repairer and decryptor
pub struct ProtocolRaop {
    config: RaopConfig,
    shared: Arc<Shared>,
    discovery: Arc<dyn RaopDiscovery>,
    supply: Arc<dyn Supply>,
    allocator: RepairableAllocator,
    repairer: Repairer,
    decryptor: AudioDecryptor,
    jiffies_per_packet: u64,
}

impl ProtocolRaop {
    /// Bind the audio and control servers
    ///
    /// # Errors
    ///
    /// Returns `RendererError::Network` if either socket cannot be bound.
    pub async fn new(
        config: RaopConfig,
        discovery: Arc<dyn RaopDiscovery>,
        supply: Arc<dyn Supply>,
        ids: Arc<IdProvider>,
    ) -> Result<Self> {
        let signal = Arc::new(Notify::new());
        let audio = AudioServer::bind(
            config.audio_addr,
            AudioChannel,
            signal.clone(),
            config.socket_retry_interval,
        )
        .await?;
        let control = ControlServer::bind(
            config.control_addr,
            config.default_latency_samples,
            signal.clone(),
            config.socket_retry_interval,
        )
        .await?;

        tracing::info!(
            audio = %audio.local_addr()?,
            control = %control.local_addr()?,
            "raop servers bound"
        );

        let shared = Arc::new(Shared {
            flags: Mutex::new(SessionFlags::new(config.default_latency_samples)),
            signal,
            drain_abort: Notify::new(),
            audio,
            control,
            ids,
        });

        Ok(Self {
            allocator: RepairableAllocator::new(config.allocator_slots(), config.slot_bytes),
            repairer: Repairer::from_config(&config),
            decryptor: AudioDecryptor::passthrough(),
            jiffies_per_packet: jiffies_per_packet(&Fmtp::default()),
            config,
            shared,
            discovery,
            supply,
        })
    }

    /// Control handle for this protocol
    #[must_use]
    pub fn handle(&self) -> RaopStreamHandle {
        RaopStreamHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stream a RAOP session until it is stopped or ends
    ///
    /// `uri` has the form `raop://<control port>.<timing port>`; it names the
    /// sender's ports rather than anything fetchable.
    ///
    /// # Errors
    ///
    /// Returns `StreamError` if the uri is not a RAOP uri.
    pub async fn stream(&mut self, uri: &str) -> Result<ProtocolStreamResult> {
        let control_port = parse_uri(uri)?;
        tracing::info!(uri, "raop stream");

        self.reset(uri, control_port);
        self.repair_reset();
        self.shared.do_interrupt(false);
        self.shared.start_servers();

        match self.run().await {
            Ok(result) => Ok(result),
            Err(RendererError::Pipeline(e)) => {
                tracing::warn!(error = %e, "pipeline unavailable, ending stream");
                self.shared.stop_servers();
                self.shared.lock().active = false;
                self.repair_reset();
                Ok(ProtocolStreamResult::ErrorRecoverable)
            }
            Err(e) => {
                self.shared.stop_servers();
                Err(e)
            }
        }
    }

    fn reset(&mut self, uri: &str, control_port: Option<u16>) {
        let client = self
            .discovery
            .client_addr()
            .zip(control_port)
            .map(SocketAddr::from);
        self.shared.control.reset(client);
        let latency = self.shared.control.latency();

        let mut flags = self.shared.lock();
        *flags = SessionFlags::new(latency);
        flags.uri = uri.to_string();
        flags.active = true;
        flags.stopped = false;
    }

    /// Drop everything buffered for the current stream. Coordinator only.
    fn repair_reset(&mut self) {
        self.repairer.drop_audio();
    }

    fn take_pending(&self) -> Pending {
        let mut flags = self.shared.lock();
        let mut pending = Pending::default();

        if flags.next_flush_id != ID_INVALID {
            pending.flush_id = Some(flags.next_flush_id);
            flags.next_flush_id = ID_INVALID;
        }
        if flags.stopped {
            pending.stopped = true;
            flags.stopped = false;
            flags.stream_id = ID_INVALID;
            flags.active = false;
        }
        if flags.waiting {
            pending.waiting = true;
            flags.waiting = false;
            self.shared.do_interrupt(false);
        }
        if flags.discontinuity {
            pending.discontinuity = true;
            flags.discontinuity = false;
            self.shared.do_interrupt(false);
        }
        if flags.starving {
            // Already starved, so there is nothing to drain
            flags.starving = false;
            self.shared.do_interrupt(false);
        }
        pending
    }

    async fn run(&mut self) -> Result<ProtocolStreamResult> {
        let mut processed = false;

        loop {
            if !processed {
                self.wait().await;
            }
            if self
                .repairer
                .deadline()
                .is_some_and(|deadline| deadline <= Instant::now())
            {
                self.repair_timer().await;
            }

            let pending = self.take_pending();

            if let Some(flush_id) = pending.flush_id {
                tracing::debug!(flush_id, "output flush");
                self.supply.output_flush(flush_id).await?;
                self.repair_reset();
            }

            if pending.stopped {
                self.discovery.close();
                self.shared.stop_servers();
                tracing::info!("raop stream stopped");
                return Ok(ProtocolStreamResult::Stopped);
            }

            if pending.waiting || pending.discontinuity {
                tracing::debug!(
                    waiting = pending.waiting,
                    discontinuity = pending.discontinuity,
                    "discontinuity"
                );
                self.output_discontinuity().await?;
                self.repair_reset();

                // A stop during the drain ends the stream here
                if self.shared.lock().stopped {
                    let flush_id = self.take_pending().flush_id;
                    if let Some(flush_id) = flush_id {
                        self.supply.output_flush(flush_id).await?;
                    }
                    self.discovery.close();
                    self.shared.stop_servers();
                    tracing::info!("raop stream stopped during discontinuity");
                    return Ok(ProtocolStreamResult::Stopped);
                }
            }

            if !self.discovery.active() {
                let flush_id = {
                    let mut flags = self.shared.lock();
                    flags.active = false;
                    flags.stopped = true;
                    std::mem::replace(&mut flags.next_flush_id, ID_INVALID)
                };
                if flush_id != ID_INVALID {
                    self.supply.output_flush(flush_id).await?;
                }
                self.repair_reset();
                self.discovery.close();
                self.shared.stop_servers();
                tracing::info!("raop session no longer active");
                return Ok(ProtocolStreamResult::Success);
            }

            processed = self.poll_servers().await?;
        }
    }

    /// Wait for a server packet, a control request or the repair timer
    async fn wait(&self) {
        let signal = self.shared.signal.clone();
        match self.repairer.deadline() {
            Some(deadline) => {
                tokio::select! {
                    () = signal.notified() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => signal.notified().await,
        }
    }

    /// Handle one pending packet, resends first
    async fn poll_servers(&mut self) -> Result<bool> {
        if let Some(response) = self.shared.control.try_packet() {
            self.process_packet(response.into_audio(), true).await?;
            self.shared.control.packet_consumed();
            return Ok(true);
        }
        if let Some(packet) = self.shared.audio.try_packet() {
            self.process_packet(packet, false).await?;
            self.shared.audio.packet_consumed();
            return Ok(true);
        }
        Ok(false)
    }

    async fn repair_timer(&mut self) {
        match self.repairer.timer_expired(Instant::now()) {
            Ok(ranges) => {
                for range in ranges {
                    if let Err(e) = self
                        .shared
                        .control
                        .request_resend(range.start, range.count())
                        .await
                    {
                        // The next timer expiry asks again
                        tracing::debug!(error = %e, "resend request failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "repair failed");
                self.shared.lock().discontinuity = true;
            }
        }
    }

    async fn process_packet(&mut self, packet: AudioPacket, resend: bool) -> Result<()> {
        let seq = packet.sequence();
        let timestamp = packet.timestamp();
        let ssrc = packet.ssrc();

        if self.shared.lock().should_flush(seq, timestamp) {
            tracing::trace!(seq, timestamp, "flushed packet dropped");
            return Ok(());
        }

        let (started, resume_pending) = {
            let flags = self.shared.lock();
            (flags.started, flags.resume_pending)
        };
        if !started || resume_pending {
            tracing::debug!(started, resume_pending, ssrc, "starting stream");
            {
                let mut flags = self.shared.lock();
                if flags.session_id == 0 {
                    flags.session_id = ssrc;
                    tracing::debug!(session_id = ssrc, "new session");
                }
            }
            self.start_or_resume().await?;
        }
        self.discovery.keep_alive();

        {
            let flags = self.shared.lock();
            if flags.session_id != ssrc {
                tracing::trace!(ssrc, session_id = flags.session_id, "foreign ssrc dropped");
                return Ok(());
            }
            if flags.should_flush(seq, timestamp) {
                return Ok(());
            }
        }

        let allocated = self
            .allocator
            .allocate(seq, timestamp, resend, packet.payload());
        let repairable = match allocated {
            Ok(repairable) => repairable,
            Err(e) => {
                tracing::warn!(seq, error = %e, "dropping audio packet");
                return Ok(());
            }
        };

        match self.repairer.output_audio(repairable) {
            Ok(frames) => {
                for frame in frames {
                    self.output_audio(&frame).await?;
                }
            }
            Err(e) => {
                tracing::debug!(seq, error = %e, "repairer signalled discontinuity");
                self.shared.lock().discontinuity = true;
                self.shared.signal.notify_one();
            }
        }
        Ok(())
    }

    async fn start_or_resume(&mut self) -> Result<()> {
        self.decryptor = match (self.discovery.aes_key(), self.discovery.aes_iv()) {
            (Some(key), Some(iv)) => AudioDecryptor::new(key, iv),
            _ => AudioDecryptor::passthrough(),
        };
        let fmtp = Fmtp::parse(&self.discovery.fmtp());
        self.jiffies_per_packet = jiffies_per_packet(&fmtp);

        let latency = self.shared.control.latency();
        let (started, stream_id, uri) = {
            let mut flags = self.shared.lock();
            let started = flags.started;
            flags.started = true;
            flags.resume_pending = false;
            flags.flush_point = None;
            if !started {
                flags.latency = latency;
            }
            // Every start or resume gets a new stream id
            flags.stream_id = self.shared.ids.next_stream_id();
            (started, flags.stream_id, flags.uri.clone())
        };

        if !started {
            let track = self.shared.ids.create_track(uri.clone());
            self.supply.output_track(track).await?;
        }
        let handler: Arc<dyn StreamHandler> = Arc::new(self.handle());
        self.supply
            .output_stream(StreamInfo {
                uri,
                stream_id,
                live: true,
                format: fmtp.stream_format(),
                handler: Some(handler),
            })
            .await?;
        if !started {
            self.supply.output_delay(delay_jiffies(latency)).await?;
        }

        tracing::info!(stream_id, resumed = started, "raop stream started");
        Ok(())
    }

    async fn output_audio(&mut self, frame: &Repairable) -> Result<()> {
        let latency = self.shared.control.latency();
        let (stream_id, delay) = {
            let mut flags = self.shared.lock();
            let delay = if latency.abs_diff(flags.latency) >= self.config.latency_change_threshold
            {
                flags.latency = latency;
                Some(delay_jiffies(latency))
            } else {
                None
            };
            (flags.stream_id, delay)
        };

        if let Some(jiffies) = delay {
            tracing::debug!(latency, "latency changed");
            self.supply.output_delay(jiffies).await?;
        }

        let audio = self.decryptor.decrypt(frame.data());
        self.supply
            .output_audio(stream_id, audio, self.jiffies_per_packet)
            .await?;
        Ok(())
    }

    async fn output_discontinuity(&mut self) -> Result<()> {
        self.shared.stop_servers();
        self.shared.lock().resume_pending = true;

        let abort = self.shared.drain_abort.notified();
        tokio::pin!(abort);
        abort.as_mut().enable();

        let (tx, rx) = oneshot::channel();
        let drain_id = self.shared.ids.next_drain_id();
        self.supply.output_drain(drain_id, tx).await?;

        if !self.shared.lock().stopped {
            tokio::select! {
                drained = tokio::time::timeout(self.config.drain_timeout, rx) => match drained {
                    Ok(Ok(())) => tracing::debug!(drain_id, "pipeline drained"),
                    Ok(Err(_)) => tracing::debug!(drain_id, "drain dropped by pipeline"),
                    Err(_) => tracing::warn!(drain_id, "timeout draining pipeline"),
                },
                () = &mut abort => tracing::debug!(drain_id, "drain interrupted"),
            }
        }

        // A stop may have arrived while draining
        if !self.shared.lock().stopped {
            self.shared.start_servers();
        }
        Ok(())
    }
}

impl Drop for ProtocolRaop {
    fn drop(&mut self) {
        self.shared.audio.shutdown();
        self.shared.control.shutdown();
    }
}

/// Parse `raop://<control port>.<timing port>` and return the control port
fn parse_uri(uri: &str) -> std::result::Result<Option<u16>, StreamError> {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return Err(StreamError::InvalidUri(uri.to_string()));
    };
    if scheme != SCHEME {
        return Err(StreamError::UnsupportedScheme(scheme.to_string()));
    }
    let port = rest
        .split('.')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|&p| p != 0);
    Ok(port)
}

/// Pipeline delay for a latency in samples
fn delay_jiffies(latency: u32) -> u64 {
    jiffies::from_samples(u64::from(latency), SAMPLE_RATE)
}

fn jiffies_per_packet(fmtp: &Fmtp) -> u64 {
    u64::from(fmtp.frames_per_packet) * jiffies::per_sample(fmtp.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        assert_eq!(parse_uri("raop://6001.6002").unwrap(), Some(6001));
        assert_eq!(parse_uri("raop://x").unwrap(), None);
        assert_eq!(
            parse_uri("http://host/stream").unwrap_err(),
            StreamError::UnsupportedScheme("http".to_string())
        );
        assert!(matches!(
            parse_uri("not a uri").unwrap_err(),
            StreamError::InvalidUri(_)
        ));
    }

    #[test]
    fn test_should_flush_wraps() {
        let mut flags = SessionFlags::new(0);
        flags.flush_point = Some((2, 100));
        assert!(!flags.should_flush(1, 50));

        flags.resume_pending = true;
        assert!(flags.should_flush(1, 50));
        assert!(flags.should_flush(65535, 50));
        assert!(!flags.should_flush(3, 50));
        assert!(!flags.should_flush(1, 101));
    }

    #[test]
    fn test_resume_without_flush_point_accepts_all() {
        let mut flags = SessionFlags::new(0);
        flags.resume_pending = true;
        assert!(!flags.should_flush(40_000, 3_000_000_000));
        assert!(!flags.should_flush(65535, u32::MAX));
        assert!(!flags.should_flush(0, 0));
    }

    #[test]
    fn test_delay_jiffies() {
        assert_eq!(delay_jiffies(44100), jiffies::PER_SECOND);
        assert_eq!(
            jiffies_per_packet(&Fmtp::default()),
            352 * jiffies::per_sample(44100)
        );
    }
}
