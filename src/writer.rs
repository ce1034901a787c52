//! The single owner of a request's outbound stream.

use crate::context::RequestContext;
use crate::error::{AnalysisError, AnalysisResult};
use crate::events::AnalysisEvent;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Destination of a request's events. Only the writer task ever touches it.
#[async_trait]
pub trait EventSink: Send {
    /// Fails once the consumer has gone away.
    async fn send(&mut self, event: &AnalysisEvent) -> AnalysisResult<()>;

    /// Resolves when the consumer has gone away, even between events.
    /// Sinks that can only notice a departure on write never resolve.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Relays events to the sink in arrival order until `finalScores` has been
/// written or the channel closes.
///
/// Nothing is relayed after `finalScores`. If the sink fails or its consumer
/// goes away the request context is cancelled and relaying stops; producers
/// then see a closed channel and drop their events.
pub fn spawn_writer<S>(
    mut sink: S,
    mut events: UnboundedReceiver<AnalysisEvent>,
    ctx: RequestContext,
) -> JoinHandle<usize>
where
    S: EventSink + 'static,
{
    tokio::spawn(async move {
        let mut delivered = 0;
        loop {
            let next = tokio::select! {
                biased;
                event = events.recv() => event,
                () = sink.closed() => {
                    log::info!(
                        "[{}] Client disconnected after {delivered} event(s)",
                        ctx.id()
                    );
                    ctx.cancel();
                    break;
                }
            };
            let Some(event) = next else { break };
            if let Err(e) = sink.send(&event).await {
                log::info!(
                    "[{}] Client disconnected after {delivered} event(s): {e}",
                    ctx.id()
                );
                ctx.cancel();
                break;
            }
            log::debug!("[{}] -> {}", ctx.id(), event.name());
            delivered += 1;
            if matches!(event, AnalysisEvent::FinalScores(_)) {
                break;
            }
        }
        delivered
    })
}

/// Writes each event as one `{"event": ..., "data": ...}` JSON line.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W> EventSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, event: &AnalysisEvent) -> AnalysisResult<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| AnalysisError::InvalidInput(format!("unserializable event: {e}")))?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::MaxScore;
    use crate::scoring::ScoreAccumulator;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Records events; starts failing after `accept` events when set.
    #[derive(Clone, Default)]
    pub(crate) struct CollectingSink {
        pub events: Arc<Mutex<Vec<AnalysisEvent>>>,
        pub accept: Option<usize>,
    }

    impl CollectingSink {
        pub(crate) fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn send(&mut self, event: &AnalysisEvent) -> AnalysisResult<()> {
            let mut events = self.events.lock().unwrap();
            if self.accept.is_some_and(|n| events.len() >= n) {
                return Err(AnalysisError::Cancelled);
            }
            events.push(event.clone());
            Ok(())
        }
    }

    fn max_score(n: i32) -> AnalysisEvent {
        AnalysisEvent::MaxScore(MaxScore { max_score: n })
    }

    /// Accepts everything until its consumer is dropped.
    struct ChannelSink {
        tx: mpsc::Sender<&'static str>,
    }

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn send(&mut self, event: &AnalysisEvent) -> AnalysisResult<()> {
            self.tx
                .send(event.name())
                .await
                .map_err(|_| AnalysisError::Cancelled)
        }

        async fn closed(&mut self) {
            self.tx.closed().await
        }
    }

    #[tokio::test]
    async fn test_relays_in_arrival_order() {
        let sink = CollectingSink::default();
        let ctx = RequestContext::new("t", Duration::from_secs(5));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(sink.clone(), rx, ctx.clone());

        for n in [3, 1, 2] {
            tx.send(max_score(n)).unwrap();
        }
        drop(tx);
        assert_eq!(writer.await.unwrap(), 3);

        let seen: Vec<i32> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                AnalysisEvent::MaxScore(m) => m.max_score,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seen, vec![3, 1, 2]);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_request() {
        let sink = CollectingSink {
            accept: Some(1),
            ..Default::default()
        };
        let ctx = RequestContext::new("t", Duration::from_secs(5));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(sink, rx, ctx.clone());

        tx.send(max_score(1)).unwrap();
        tx.send(max_score(2)).unwrap();
        assert_eq!(writer.await.unwrap(), 1);
        assert!(ctx.is_cancelled());
        assert!(tx.send(max_score(3)).is_err());
    }

    #[tokio::test]
    async fn test_nothing_follows_final_scores() {
        let sink = CollectingSink::default();
        let ctx = RequestContext::new("t", Duration::from_secs(5));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(sink.clone(), rx, ctx.clone());

        tx.send(max_score(95)).unwrap();
        tx.send(AnalysisEvent::FinalScores(ScoreAccumulator::new().finish(95)))
            .unwrap();
        assert_eq!(writer.await.unwrap(), 2);

        // a straggler that still holds a sender is refused
        assert!(tx.send(max_score(1)).is_err());
        assert_eq!(sink.names(), vec!["maxScore", "finalScores"]);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_departed_consumer_cancels_while_idle() {
        let (sink_tx, mut sink_rx) = mpsc::channel(4);
        let ctx = RequestContext::new("t", Duration::from_secs(60));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(ChannelSink { tx: sink_tx }, rx, ctx.clone());

        tx.send(max_score(95)).unwrap();
        assert_eq!(sink_rx.recv().await, Some("maxScore"));
        drop(sink_rx);

        // no further event is produced, yet the writer notices the departure
        let delivered = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("writer kept waiting for events")
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(ctx.is_cancelled());
        drop(tx);
    }

    #[tokio::test]
    async fn test_json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.send(&max_score(95)).await.unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "{\"event\":\"maxScore\",\"data\":{\"maxScore\":95}}\n");
    }
}
