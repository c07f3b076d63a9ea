//! Media pipeline controls layered on top of a session.
//!
//! [`MediaControls`] is a thin facade for a video sender/receiver:
//!
//! - encoder tuning (bitrate, frame rate, reset) passes straight through to a
//!   [`VideoEncoder`] collaborator;
//! - captured frames are only handed to the encoder while connected;
//! - encoded access units travel as [`MessageType::HevcData`] frames;
//! - decoded outputs are fanned out to any number of consumers.
//!
//! The codec itself is out of scope.  Any encoder that can be driven through
//! [`VideoEncoder`] fits, and decoded output of any cloneable type can be
//! published.

use std::marker::PhantomData;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use realtime_core::MessageType;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::application::fanout::{Broadcaster, Subscription};
use crate::application::session::{MessageSender, SessionError, SessionManager};
use crate::infrastructure::network::TransportError;

/// Hardware or software video encoder driven by [`MediaControls`].
#[cfg_attr(test, mockall::automock)]
pub trait VideoEncoder<F: Send + Sync + 'static>: Send + Sync {
    fn set_average_bitrate(&self, bits_per_second: u32);
    fn set_expected_frame_rate(&self, frames_per_second: u32);
    /// Queues one captured frame.  Encoded output is delivered out of band,
    /// typically into a channel drained by [`forward_encoded`].
    fn encode(&self, frame: F);
    /// Drops encoder state so the next output starts with a key frame.
    fn invalidate(&self);
}

/// Sender/receiver facade over a [`SessionManager`].
pub struct MediaControls<F, D, E> {
    session: SessionManager,
    encoder: E,
    service_id: String,
    decoded: Broadcaster<D>,
    _frames: PhantomData<fn(F)>,
}

impl<F, D, E> MediaControls<F, D, E>
where
    F: Send + Sync + 'static,
    D: Clone,
    E: VideoEncoder<F>,
{
    pub fn new(session: SessionManager, encoder: E, service_id: impl Into<String>) -> Self {
        let decoded = Broadcaster::new(session.config().subscriber_buffer);
        Self {
            session,
            encoder,
            service_id: service_id.into(),
            decoded,
            _frames: PhantomData,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    // ── Encoder tuning ────────────────────────────────────────────────────────

    pub fn set_bitrate(&self, bits_per_second: u32) {
        debug!("encoder bitrate -> {bits_per_second} bps");
        self.encoder.set_average_bitrate(bits_per_second);
    }

    pub fn set_expected_frame_rate(&self, frames_per_second: u32) {
        debug!("encoder frame rate -> {frames_per_second} fps");
        self.encoder.set_expected_frame_rate(frames_per_second);
    }

    pub fn reset_encoder(&self) {
        debug!("encoder reset");
        self.encoder.invalidate();
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Hands `frame` to the encoder if a peer is connected; otherwise the
    /// frame is dropped.  Returns whether it was submitted.
    pub fn submit_frame(&self, frame: F) -> bool {
        if !self.session.is_connected() {
            trace!("frame dropped: not connected");
            return false;
        }
        self.encoder.encode(frame);
        true
    }

    /// Sends one encoded access unit.
    pub async fn send_encoded(&self, unit: &[u8]) -> Result<(), TransportError> {
        self.session.send(unit, MessageType::HevcData).await
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    /// Stream of inbound HEVC access units; other message types are skipped.
    pub fn encoded_units(&self) -> impl Stream<Item = Bytes> {
        self.session.received_messages().filter_map(|message| async move {
            (message.message_type == MessageType::HevcData).then_some(message.payload)
        })
    }

    /// Registers a consumer of decoded output.
    pub fn decoded_outputs(&self) -> Subscription<D> {
        self.decoded.subscribe()
    }

    /// Publishes one decoded output to every consumer.  Returns how many
    /// received it.
    pub fn publish_decoded(&self, output: D) -> usize {
        self.decoded.publish(output)
    }

    // ── Discovery and connection ──────────────────────────────────────────────

    pub fn start_browsing(&self) {
        self.session.start_browsing(&self.service_id);
    }

    pub fn start_advertising(&self) {
        self.session.start_advertising(&self.service_id);
    }

    pub fn stop_advertising(&self) {
        self.session.stop_advertising();
    }

    pub fn advertised_addr(&self) -> Option<SocketAddr> {
        self.session.advertised_addr()
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    pub fn attempt_to_reconnect(&self) {
        self.session.attempt_to_reconnect();
    }

    pub fn open_connection(&self, endpoint: &realtime_core::Endpoint) -> Result<(), SessionError> {
        self.session.open_connection(endpoint)
    }
}

/// Drains encoder output and sends each unit as an HEVC frame until the
/// channel closes.  Units produced while disconnected are dropped.  Returns
/// the number of units sent.
pub async fn forward_encoded<S>(sender: &S, mut units: mpsc::Receiver<Vec<u8>>) -> usize
where
    S: MessageSender + ?Sized,
{
    let mut sent = 0;
    while let Some(unit) = units.recv().await {
        match sender.send(&unit, MessageType::HevcData).await {
            Ok(()) => sent += 1,
            Err(TransportError::NotConnected) => trace!("encoded unit dropped: not connected"),
            Err(e) => warn!("failed to send encoded unit of {} bytes: {e}", unit.len()),
        }
    }
    sent
}

// ── Tests ─────────────────────────────────────────────────────────────────────
