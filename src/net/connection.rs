use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::net::framing::{encode_envelope, write_frame, FramingError};
use crate::net::protocol::ServerEnvelope;

pub type ConnectionId = u64;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, no player bound yet
    Connecting = 0,
    /// Bound to a player
    Connected = 1,
    /// Close requested, writer draining
    Disconnecting = 2,
    /// Writer finished
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Work queued onto a connection's writer task
pub enum Outbound {
    Frame(Vec<u8>),
    /// Runs on the writer task, ordered with the frames around it
    Exec(Box<dyn FnOnce() + Send>),
    Close,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Frame(bytes) => write!(f, "Frame({} bytes)", bytes.len()),
            Outbound::Exec(_) => write!(f, "Exec"),
            Outbound::Close => write!(f, "Close"),
        }
    }
}

/// Handle to one ordered-channel endpoint.
///
/// All writes go through an unbounded queue drained by a single writer
/// task, which is also the connection's execution context for
/// [`OrderedConnection::execute`].
#[derive(Debug)]
pub struct OrderedConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    state: AtomicU8,
    tx: mpsc::UnboundedSender<Outbound>,
    frames_sent: AtomicU64,
}

impl OrderedConnection {
    /// Spawn the writer task over `writer`
    pub fn spawn<W>(peer: SocketAddr, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, rx) = Self::detached(peer);
        let handle = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = writer_loop(writer, rx).await {
                tracing::debug!("Connection {} writer stopped: {}", handle.id, e);
            }
            handle.set_state(ConnectionState::Disconnected);
        });
        connection
    }

    /// Connection whose queue is returned to the caller instead of a writer task
    pub fn detached(peer: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: rand::random::<u64>(),
            peer,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            frames_sent: AtomicU64::new(0),
        });
        (connection, rx)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Connecting -> Connected; false if already past that
    pub fn mark_connected(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// Queue a raw frame payload
    pub fn send(&self, payload: Vec<u8>) -> bool {
        if !self.is_open() {
            return false;
        }
        let sent = self.tx.send(Outbound::Frame(payload)).is_ok();
        if sent {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    pub fn send_envelope(&self, envelope: &ServerEnvelope) -> Result<bool, FramingError> {
        Ok(self.send(encode_envelope(envelope)?))
    }

    /// Run `task` on this connection's writer task
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.is_open() && self.tx.send(Outbound::Exec(Box::new(task))).is_ok()
    }

    /// Flush what is queued, then close. Idempotent.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Disconnecting as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

async fn writer_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(payload) => write_frame(&mut writer, &payload).await?,
            Outbound::Exec(task) => task(),
            Outbound::Close => break,
        }
    }
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::framing::read_frame;
    use crate::net::protocol::{self, ServerEvent};
    use std::sync::atomic::AtomicBool;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (conn, _rx) = OrderedConnection::detached(peer());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_connected());
        assert!(!conn.mark_connected());
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnecting);
        assert!(!conn.send(vec![1]));
    }

    #[test]
    fn test_detached_queue_order() {
        let (conn, mut rx) = OrderedConnection::detached(peer());
        assert!(conn.send(vec![1]));
        assert!(conn.execute(|| {}));
        conn.close();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(p)) if p == vec![1]));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Exec(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert_eq!(conn.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_writer_task_frames_and_runs_tasks_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let conn = OrderedConnection::spawn(peer(), server);
        let ran = Arc::new(AtomicBool::new(false));

        conn.send_envelope(&protocol::ServerEnvelope::unsequenced(ServerEvent::Ping))
            .unwrap();
        let flag = ran.clone();
        conn.execute(move || flag.store(true, Ordering::SeqCst));
        conn.close();

        let mut client = client;
        let payload = read_frame(&mut client).await.unwrap();
        let envelope: ServerEnvelope = protocol::decode(&payload).unwrap();
        assert!(matches!(envelope.event, ServerEvent::Ping));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
