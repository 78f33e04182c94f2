//! Pump tasks connecting a raw async transport to a reader/writer pair.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::writer::{CloseOutcome, FlowControl, WriteCommand};
use super::{StreamReader, StreamWriter};

/// Default backlog above which writers are asked to drain (64 KiB).
pub const DEFAULT_HIGH_WATER: usize = 64 * 1024;

/// Default backlog at which backpressure is released again (16 KiB).
pub const DEFAULT_LOW_WATER: usize = 16 * 1024;

const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Tuning knobs for [`open`].
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub high_water: usize,
    pub low_water: usize,
    /// Size of each read issued against the transport.
    pub read_chunk: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_LOW_WATER,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Splits `io` into a [`StreamReader`] / [`StreamWriter`] pair.
///
/// Two tasks are spawned on the current Tokio runtime: one copies incoming
/// bytes into the reader, the other drains the writer's queue into the
/// transport. Closing the writer, a transport error, or dropping every writer
/// tears both down and signals end of stream on the reader.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
pub fn open<T>(io: T, options: TransportOptions) -> (StreamReader, StreamWriter)
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);

    let reader = StreamReader::new();
    let read_task = tokio::spawn(read_pump(read_half, reader.clone(), options.read_chunk));

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(None);
    let flow = Arc::new(FlowControl::new(options.high_water, options.low_water));

    tokio::spawn(write_pump(
        write_half,
        commands_rx,
        Arc::clone(&flow),
        WriteTeardown {
            reader: reader.clone(),
            read_task: read_task.abort_handle(),
            closed: closed_tx,
        },
    ));

    (reader, StreamWriter::new(commands_tx, flow, closed_rx))
}

async fn read_pump<R>(mut io: R, reader: StreamReader, chunk: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk);

    loop {
        buf.reserve(chunk);
        match io.read_buf(&mut buf).await {
            Ok(0) => {
                trace!("transport reached end of stream");
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "transport read");
                if reader.feed(&buf).is_err() {
                    break;
                }
                buf.clear();
            }
            Err(e) => {
                debug!(error = %e, "transport read failed");
                break;
            }
        }
    }

    reader.feed_eof();
}

struct WriteTeardown {
    reader: StreamReader,
    read_task: AbortHandle,
    closed: watch::Sender<Option<CloseOutcome>>,
}

async fn write_pump<W>(
    mut io: W,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
    flow: Arc<FlowControl>,
    teardown: WriteTeardown,
) where
    W: AsyncWrite + Unpin,
{
    let outcome: CloseOutcome = loop {
        match commands.recv().await {
            Some(WriteCommand::Data(data)) => {
                if let Err(e) = io.write_all(&data).await {
                    debug!(error = %e, "transport write failed");
                    break Err(Arc::new(e));
                }
                flow.consumed(data.len());
            }
            Some(WriteCommand::Shutdown) => {
                if let Err(e) = io.shutdown().await {
                    break Err(Arc::new(e));
                }
            }
            Some(WriteCommand::Close) | None => break Ok(()),
        }
    };

    flow.mark_closing();
    let _ = io.shutdown().await;

    teardown.read_task.abort();
    teardown.reader.feed_eof();
    teardown.closed.send_replace(Some(outcome));
    trace!("transport closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamError;

    #[tokio::test]
    async fn bytes_flow_in_both_directions() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_reader, client_writer) = open(client, TransportOptions::default());
        let (server_reader, server_writer) = open(server, TransportOptions::default());

        client_writer.write("ping").unwrap();
        assert_eq!(&server_reader.read_exact(4).await.unwrap()[..], b"ping");

        server_writer.write_and_drain("pong", None).await.unwrap();
        assert_eq!(&client_reader.read_exact(4).await.unwrap()[..], b"pong");
    }

    #[tokio::test]
    async fn close_signals_eof_to_peer() {
        let (client, server) = tokio::io::duplex(1024);
        let (_client_reader, client_writer) = open(client, TransportOptions::default());
        let (server_reader, _server_writer) = open(server, TransportOptions::default());

        client_writer.write("bye").unwrap();
        client_writer.close();
        client_writer.wait_closed().await.unwrap();

        match server_reader.read(Some(10), None).await {
            Err(StreamError::PartialRead { partial, .. }) => assert_eq!(&partial[..], b"bye"),
            other => panic!("expected PartialRead, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_close_ends_local_reader() {
        let (client, _server) = tokio::io::duplex(1024);
        let (reader, writer) = open(client, TransportOptions::default());

        writer.close();
        writer.wait_closed().await.unwrap();
        assert!(reader.read(Some(1), None).await.is_err());
        assert!(reader.at_eof());
    }

    #[tokio::test]
    async fn large_writes_drain_once_peer_reads() {
        let options = TransportOptions {
            high_water: 16,
            low_water: 4,
            read_chunk: 64,
        };
        let (client, server) = tokio::io::duplex(8);
        let (_client_reader, client_writer) = open(client, options);
        let (server_reader, _server_writer) = open(server, TransportOptions::default());

        let payload = vec![b'x'; 256];
        client_writer.write(payload.clone()).unwrap();

        let drained = tokio::spawn({
            let writer = client_writer.clone();
            async move { writer.drain(None).await }
        });

        let received = server_reader.read_exact(256).await.unwrap();
        assert_eq!(&received[..], &payload[..]);
        drained.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn small_writes_race_the_pump_without_corrupting_flow() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_client_reader, client_writer) = open(client, TransportOptions::default());
        let (server_reader, _server_writer) = open(server, TransportOptions::default());

        let rounds = 200;
        let writes = 2000;
        let total = rounds * writes * 7;

        let reading = tokio::spawn(async move { server_reader.read_exact(total).await });
        for _ in 0..rounds {
            for _ in 0..writes {
                client_writer.write(&b"7 bytes"[..]).unwrap();
            }
            client_writer.drain(None).await.unwrap();
        }

        let received = reading.await.unwrap().unwrap();
        assert_eq!(received.len(), total);
        client_writer.drain(Some(std::time::Duration::from_secs(5))).await.unwrap();
    }
}
