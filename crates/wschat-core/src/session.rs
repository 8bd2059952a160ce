//! Participant sessions.
//!
//! A session owns one connection. Its inbound side reads frames, decodes
//! them and submits broadcasts to the hub; its outbound side drains the
//! participant's queue onto the connection and sends keepalive pings. The
//! two sides run concurrently and the session ends when either of them does.

use crate::config::SessionConfig;
use crate::hub::{HubError, HubHandle, Participant};
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{self, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use wschat_protocol::{codec, ChatMessage, Frame, ProtocolError};
use wschat_transport::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No inbound frame within the read window.
    #[error("No frame received within {0:?}")]
    ReadTimeout(Duration),

    /// An outbound write did not finish in time.
    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// The connection failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer broke the protocol, or a batch could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The hub stopped.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// The outbound task panicked or was cancelled.
    #[error("Writer task failed: {0}")]
    Task(#[from] JoinError),
}

impl SessionError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::ReadTimeout(_) => "read_timeout",
            SessionError::WriteTimeout(_) => "write_timeout",
            SessionError::Transport(_) => "transport",
            SessionError::Protocol(_) => "protocol",
            SessionError::Hub(_) => "hub",
            SessionError::Task(_) => "task",
        }
    }
}

/// Serve one connection until it ends.
///
/// Joins the hub, runs the outbound side on its own task and the inbound
/// side on the current one. Whichever finishes first ends the session: the
/// participant leaves the hub exactly once, and the outbound task is awaited
/// so both halves of the connection are released before this returns.
///
/// # Errors
///
/// Returns the reason the session ended, unless the peer simply went away.
pub async fn serve(
    connection: Connection,
    hub: HubHandle,
    config: SessionConfig,
) -> Result<(), SessionError> {
    let Connection {
        id,
        mut reader,
        writer,
        remote_addr,
    } = connection;

    let (participant, queue) = Participant::new(id.clone(), config.send_buffer);
    hub.join(participant).await?;
    debug!(connection = %id, remote = ?remote_addr, "Session started");

    let mut write_task = tokio::spawn(write_pump(id.clone(), writer, queue, config.clone()));

    let (read_result, finished_write) = tokio::select! {
        result = read_pump(&id, reader.as_mut(), &hub, &config) => (result, None),
        joined = &mut write_task => (Ok(()), Some(joined)),
    };

    // Closing the inbound stream; a read still in flight is abandoned.
    drop(reader);

    if hub.leave(id.clone()).await.is_err() {
        // A stopped hub has already closed every queue.
        debug!(connection = %id, "Hub stopped before leave");
    }

    let write_result = match finished_write {
        Some(joined) => joined,
        None => write_task.await,
    };
    let write_result = write_result.map_err(SessionError::from).and_then(|r| r);

    let result = read_result.and(write_result);
    match &result {
        Ok(()) => {
            debug!(connection = %id, "Session ended");
            metrics::record_session_end("closed");
        }
        Err(e) => {
            debug!(connection = %id, error = %e, "Session terminated");
            metrics::record_session_end(e.kind());
        }
    }
    result
}

/// Inbound side: frames in, broadcasts out.
async fn read_pump(
    id: &ConnectionId,
    reader: &mut dyn FrameReader,
    hub: &HubHandle,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    loop {
        let frame = match timeout(config.pong_wait, reader.recv()).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::ReadTimeout(config.pong_wait)),
        };

        let Some(frame) = frame else {
            debug!(connection = %id, "Inbound stream ended");
            return Ok(());
        };

        metrics::record_frame("inbound", frame.frame_type());

        match frame {
            Frame::Text(_) | Frame::Binary(_) => {
                codec::check_size(frame.payload_len(), config.max_message_size)?;
                let message = codec::decode_message(frame.payload());
                trace!(
                    connection = %id,
                    nickname = %message.nickname,
                    text = %message.text,
                    "Message read"
                );
                hub.broadcast(message).await?;
            }
            Frame::Ping(_) | Frame::Pong(_) => {
                trace!(connection = %id, frame = %frame.frame_type(), "Keepalive received");
            }
            Frame::Close => {
                debug!(connection = %id, "Received close frame");
                return Ok(());
            }
        }
    }
}

/// Outbound side: queue and keepalive ticks in, frames out.
///
/// The writer is closed on every exit path. Closing gets the same deadline
/// as a write, since it flushes whatever the peer has not yet read.
async fn write_pump(
    id: ConnectionId,
    mut writer: Box<dyn FrameWriter>,
    mut queue: mpsc::Receiver<Arc<ChatMessage>>,
    config: SessionConfig,
) -> Result<(), SessionError> {
    let result = drain_queue(&id, writer.as_mut(), &mut queue, &config).await;

    match timeout(config.write_wait, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection = %id, error = %e, "Error closing outbound stream"),
        Err(_) => warn!(connection = %id, "Close deadline exceeded, dropping outbound stream"),
    }

    result
}

async fn drain_queue(
    id: &ConnectionId,
    writer: &mut dyn FrameWriter,
    queue: &mut mpsc::Receiver<Arc<ChatMessage>>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let mut ticker = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch: Vec<Arc<ChatMessage>> = Vec::with_capacity(config.send_buffer);

    loop {
        tokio::select! {
            message = queue.recv() => {
                let Some(first) = message else {
                    debug!(connection = %id, "Outbound queue closed");
                    if let Err(e) = write_frame(writer, Frame::Close, config.write_wait).await {
                        debug!(connection = %id, error = %e, "Failed to send close frame");
                    }
                    return Ok(());
                };

                // Coalesce whatever is already buffered behind the first message.
                batch.push(first);
                while batch.len() < config.send_buffer {
                    match queue.try_recv() {
                        Ok(next) => batch.push(next),
                        Err(_) => break,
                    }
                }

                let text = codec::encode_batch(batch.iter().map(|m| m.as_ref()))?;
                trace!(connection = %id, messages = batch.len(), "Writing batch");
                batch.clear();

                write_frame(writer, Frame::Text(text), config.write_wait).await?;
            }
            _ = ticker.tick() => {
                trace!(connection = %id, "Sending ping");
                write_frame(writer, Frame::ping(), config.write_wait).await?;
            }
        }
    }
}

async fn write_frame(
    writer: &mut dyn FrameWriter,
    frame: Frame,
    deadline: Duration,
) -> Result<(), SessionError> {
    let frame_type = frame.frame_type();
    match timeout(deadline, writer.send(frame)).await {
        Ok(result) => {
            result?;
            metrics::record_frame("outbound", frame_type);
            Ok(())
        }
        Err(_) => {
            warn!(frame = %frame_type, "Write deadline exceeded");
            Err(SessionError::WriteTimeout(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::{self, HubEvent};
    use async_trait::async_trait;
    use wschat_protocol::codec::decode_batch;
    use wschat_transport::memory::{self, MemoryPeer};

    fn test_hub() -> (HubHandle, mpsc::Receiver<HubEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (HubHandle::from_sender(tx), rx)
    }

    fn chat_frame(nickname: &str, text: &str) -> Frame {
        Frame::Text(codec::encode_message(&ChatMessage::new(nickname, text)).unwrap())
    }

    async fn expect_batch(peer: &mut MemoryPeer) -> Vec<ChatMessage> {
        match peer.recv().await {
            Some(Frame::Text(text)) => decode_batch(text.as_bytes()).unwrap().messages,
            other => panic!("Expected batch frame, got {:?}", other),
        }
    }

    async fn wait_for_participants(hub: &HubHandle, count: usize) {
        while hub.stats().await.unwrap().participants != count {
            tokio::task::yield_now().await;
        }
    }

    /// Writer for a peer that stopped reading: neither sends nor the closing
    /// flush ever complete.
    struct StalledWriter;

    #[async_trait]
    impl FrameWriter for StalledWriter {
        async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    /// Writer that fails every send, as a reset connection would.
    struct BrokenWriter;

    #[async_trait]
    impl FrameWriter for BrokenWriter {
        async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
            Err(TransportError::SendFailed("connection reset".into()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_three_participants_receive_broadcast() {
        let (hub, _hub_task) = hub::spawn(HubConfig::default());
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (conn, peer) = memory::pair();
            tokio::spawn(serve(conn, hub.clone(), SessionConfig::default()));
            peers.push(peer);
        }
        wait_for_participants(&hub, 3).await;

        assert!(peers[0].send(chat_frame("A", "hello")));

        // Everyone gets exactly one frame with exactly that message, A included.
        for peer in &mut peers {
            assert_eq!(expect_batch(peer).await, vec![ChatMessage::new("A", "hello")]);
            assert!(peer.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_messages_from_many_senders_keep_hub_order() {
        let (hub, _hub_task) = hub::spawn(HubConfig::default());
        let (conn_a, mut a) = memory::pair();
        let (conn_b, mut b) = memory::pair();
        tokio::spawn(serve(conn_a, hub.clone(), SessionConfig::default()));
        tokio::spawn(serve(conn_b, hub.clone(), SessionConfig::default()));
        wait_for_participants(&hub, 2).await;

        for i in 0..5 {
            let frame = chat_frame("x", &i.to_string());
            if i % 2 == 0 {
                assert!(a.send(frame));
            } else {
                assert!(b.send(frame));
            }
            // A sees every message before the next sender writes.
            let seen: Vec<String> = expect_batch(&mut a).await.into_iter().map(|m| m.text).collect();
            assert_eq!(seen, vec![i.to_string()]);
        }

        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.extend(expect_batch(&mut b).await.into_iter().map(|m| m.text));
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_malformed_message_still_broadcast() {
        let (hub, mut events) = test_hub();
        let (conn, peer) = memory::pair();
        let session = tokio::spawn(serve(conn, hub, SessionConfig::default()));

        let Some(HubEvent::Join(participant)) = events.recv().await else {
            panic!("Expected join");
        };

        assert!(peer.send(Frame::text("definitely not json")));
        match events.recv().await {
            Some(HubEvent::Broadcast(message)) => assert!(message.is_empty()),
            other => panic!("Expected broadcast, got {:?}", other),
        }

        assert!(peer.send(Frame::Binary(br#"{"nickname":"bin","text":"ary"}"#.to_vec())));
        match events.recv().await {
            Some(HubEvent::Broadcast(message)) => {
                assert_eq!(*message, ChatMessage::new("bin", "ary"));
            }
            other => panic!("Expected broadcast, got {:?}", other),
        }

        drop(peer);
        assert!(matches!(events.recv().await, Some(HubEvent::Leave(id)) if &id == participant.id()));
        drop(participant);
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_oversized_frame_terminates_session() {
        let (hub, mut events) = test_hub();
        let (conn, peer) = memory::pair();
        let session = tokio::spawn(serve(conn, hub, SessionConfig::default()));

        let Some(HubEvent::Join(participant)) = events.recv().await else {
            panic!("Expected join");
        };

        assert!(peer.send(Frame::text("x".repeat(513))));
        assert!(matches!(events.recv().await, Some(HubEvent::Leave(_))));
        drop(participant);

        let result = session.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::FrameTooLarge { size: 513, limit: 512 }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out_with_single_leave() {
        let (hub, mut events) = test_hub();
        let (conn, mut peer) = memory::pair();
        let start = Instant::now();
        let session = tokio::spawn(serve(conn, hub, SessionConfig::default()));

        let Some(HubEvent::Join(participant)) = events.recv().await else {
            panic!("Expected join");
        };

        // Nothing arrives from the peer, so the read window expires.
        match events.recv().await {
            Some(HubEvent::Leave(id)) => assert_eq!(&id, participant.id()),
            other => panic!("Expected leave, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
        drop(participant);

        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::ReadTimeout(_))));

        // The session dropped its handle, and no second leave was sent.
        assert!(events.recv().await.is_none());

        // A ping went out before the deadline, then the close frame.
        assert_eq!(peer.recv().await, Some(Frame::ping()));
        assert_eq!(peer.recv().await, Some(Frame::Close));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_on_interval() {
        let (hub, _hub_task) = hub::spawn(HubConfig::default());
        let (conn, mut peer) = memory::pair();
        let config = SessionConfig::default();
        let start = Instant::now();
        let session = tokio::spawn(serve(conn, hub.clone(), config.clone()));

        for k in 1..=4u32 {
            assert_eq!(peer.recv().await, Some(Frame::ping()));
            let elapsed = start.elapsed();
            assert!(elapsed >= config.ping_period * k);
            assert!(elapsed < config.ping_period * k + Duration::from_secs(1));
            assert!(elapsed < config.pong_wait * k);

            // The pong keeps the session alive past the read window.
            assert!(peer.send(Frame::pong(Vec::new())));
        }

        assert_eq!(hub.stats().await.unwrap().participants, 1);

        peer.disconnect();
        assert!(session.await.unwrap().is_ok());
        assert_eq!(peer.recv().await, Some(Frame::Close));
        assert_eq!(hub.stats().await.unwrap().participants, 0);
    }

    #[tokio::test]
    async fn test_buffered_messages_coalesce_into_one_batch() {
        let (conn, mut peer) = memory::pair();
        let (participant, queue) = Participant::new(conn.id.clone(), 16);
        for text in ["one", "two", "three"] {
            participant
                .try_deliver(Arc::new(ChatMessage::new("n", text)))
                .unwrap();
        }

        let writer = tokio::spawn(write_pump(
            conn.id.clone(),
            conn.writer,
            queue,
            SessionConfig::default(),
        ));

        let batch = expect_batch(&mut peer).await;
        let texts: Vec<&str> = batch.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        // Closing the queue makes the writer send a close frame and finish.
        drop(participant);
        assert_eq!(peer.recv().await, Some(Frame::Close));
        assert!(writer.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_hits_deadline() {
        let (participant, queue) = Participant::new("stalled".into(), 4);
        participant
            .try_deliver(Arc::new(ChatMessage::new("n", "t")))
            .unwrap();

        let config = SessionConfig::default();
        let start = Instant::now();
        let result = write_pump(
            "stalled".into(),
            Box::new(StalledWriter),
            queue,
            config.clone(),
        )
        .await;

        assert!(matches!(result, Err(SessionError::WriteTimeout(d)) if d == config.write_wait));
        // One deadline for the batch, one for the closing flush.
        assert_eq!(start.elapsed(), config.write_wait * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_session_finishes_with_single_leave() {
        let (hub, mut events) = test_hub();
        let (mut conn, _peer) = memory::pair();
        conn.writer = Box::new(StalledWriter);
        let config = SessionConfig::default();
        let start = Instant::now();
        let session = tokio::spawn(serve(conn, hub, config.clone()));

        let Some(HubEvent::Join(participant)) = events.recv().await else {
            panic!("Expected join");
        };
        participant
            .try_deliver(Arc::new(ChatMessage::new("n", "t")))
            .unwrap();

        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionError::WriteTimeout(_))));
        assert!(start.elapsed() <= config.write_wait * 2);

        match events.recv().await {
            Some(HubEvent::Leave(id)) => assert_eq!(&id, participant.id()),
            other => panic!("Expected leave, got {:?}", other),
        }
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ping_ends_session() {
        let (hub, _hub_task) = hub::spawn(HubConfig::default());
        let (mut conn, _peer) = memory::pair();
        conn.writer = Box::new(BrokenWriter);
        let config = SessionConfig::default();
        let start = Instant::now();

        let result = serve(conn, hub.clone(), config.clone()).await;

        // The ping failed before the read window could expire.
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(start.elapsed() < config.pong_wait);
        assert_eq!(hub.stats().await.unwrap().participants, 0);
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_sessions() {
        let (hub, hub_task) = hub::spawn(HubConfig::default());
        let (conn, mut peer) = memory::pair();
        let session = tokio::spawn(serve(conn, hub.clone(), SessionConfig::default()));
        wait_for_participants(&hub, 1).await;

        hub.shutdown().await.unwrap();
        hub_task.await.unwrap();
        assert_eq!(peer.recv().await, Some(Frame::Close));

        // The closed queue ends the session, inbound side included.
        assert!(session.await.unwrap().is_ok());
        assert!(!peer.send(chat_frame("late", "message")));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_broadcast_to_stopped_hub_ends_session() {
        let (hub, mut events) = test_hub();
        let (conn, mut peer) = memory::pair();
        let session = tokio::spawn(serve(conn, hub, SessionConfig::default()));

        let Some(HubEvent::Join(participant)) = events.recv().await else {
            panic!("Expected join");
        };
        drop(events);

        assert!(peer.send(chat_frame("late", "message")));
        // Wait for the failed broadcast to end the inbound side.
        while peer.send(Frame::pong(Vec::new())) {
            tokio::task::yield_now().await;
        }
        // The queue sender goes with the hub, so the writer closes too.
        drop(participant);

        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::Hub(HubError::Stopped))
        ));
        assert_eq!(peer.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_serve_fails_without_hub() {
        let (hub, events) = test_hub();
        drop(events);
        let (conn, _peer) = memory::pair();
        assert!(matches!(
            serve(conn, hub, SessionConfig::default()).await,
            Err(SessionError::Hub(HubError::Stopped))
        ));
    }
}
