//!
//! Request/reply helpers.
//!
//! A requestor owns a non-transacted session and a temporary destination. Each request carries
//! the temporary destination as its reply-to header and waits for the first message that arrives
//! there.
//!
use crate::consumer::{ConsumerOptions, MessageConsumer};
use crate::destination::{destination_ref, Destination, DestinationRef, TemporaryQueue, TemporaryTopic};
use crate::error::JmsError;
use crate::message::Message;
use crate::producer::{MessageProducer, TopicPublisher};
use crate::session::{QueueSession, Session, TopicSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

fn check_session<S: Session>(session: &S) -> Result<(), JmsError> {
    if session.transacted() {
        return Err(JmsError::illegal_state(
            "A requestor cannot use a transacted session",
        ));
    }
    Ok(())
}

fn check_target(
    destination: Option<DestinationRef>,
    matches: fn(&dyn Destination) -> bool,
    domain: &str,
) -> Result<DestinationRef, JmsError> {
    let destination = destination
        .ok_or_else(|| JmsError::invalid_destination(format!("A {} is required", domain)))?;
    if !matches(destination.as_ref()) {
        return Err(JmsError::invalid_destination(format!(
            "`{}` is not a {}",
            destination.name(),
            domain
        )));
    }
    Ok(destination)
}

fn check_open(closed: &AtomicBool) -> Result<(), JmsError> {
    if closed.load(Ordering::Acquire) {
        return Err(JmsError::illegal_state("Requestor is closed"));
    }
    Ok(())
}

/// Request/reply over the point-to-point domain.
pub struct QueueRequestor<S: QueueSession> {
    session: S,
    temporary_queue: S::TemporaryQueue,
    reply_to: DestinationRef,
    sender: S::Sender,
    receiver: S::Receiver,
    closed: AtomicBool,
}

impl<S: QueueSession> QueueRequestor<S> {
    /// Fails with `InvalidDestination` without a queue and with `IllegalState` for a transacted
    /// session.
    pub async fn new(session: S, queue: Option<DestinationRef>) -> Result<Self, JmsError> {
        let queue = check_target(queue, |d| d.kind().is_queue(), "queue")?;
        check_session(&session)?;

        let temporary_queue = session.create_temporary_queue().await?;
        let reply_to = destination_ref(&temporary_queue);
        let endpoints = async {
            let sender = session.create_sender(Some(queue.clone())).await?;
            let receiver = session.create_receiver(reply_to.clone(), None).await?;
            Ok::<_, JmsError>((sender, receiver))
        }
        .await;
        let (sender, receiver) = match endpoints {
            Ok(endpoints) => endpoints,
            Err(e) => {
                if let Err(cleanup) = temporary_queue.delete().await {
                    warn!(reply_to = %reply_to.name(), error = %cleanup, "Failed to delete temporary queue");
                }
                return Err(e);
            }
        };
        debug!(queue = %queue.name(), reply_to = %reply_to.name(), "Created queue requestor");

        Ok(Self {
            session,
            temporary_queue,
            reply_to,
            sender,
            receiver,
            closed: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// The temporary queue replies are expected on.
    pub fn reply_to(&self) -> &DestinationRef {
        &self.reply_to
    }

    /// Send `message` and wait for its reply. Returns `None` if the session is closed while
    /// waiting.
    pub async fn request(&self, message: &mut Message) -> Result<Option<Message>, JmsError> {
        self.send(message).await?;
        self.receiver.receive().await
    }

    /// Like [`request`](Self::request), returning `None` when no reply arrives within `timeout`.
    pub async fn request_timeout(
        &self,
        message: &mut Message,
        timeout: Duration,
    ) -> Result<Option<Message>, JmsError> {
        self.send(message).await?;
        self.receiver.receive_timeout(timeout).await
    }

    async fn send(&self, message: &mut Message) -> Result<(), JmsError> {
        check_open(&self.closed)?;
        message.headers_mut().set_reply_to(Some(self.reply_to.clone()));
        self.sender.send(message).await?;
        debug!(
            message_id = ?message.headers().message_id().map(|id| id.as_str()),
            reply_to = %self.reply_to.name(),
            "Sent request"
        );
        Ok(())
    }

    /// Close the session and delete the temporary queue. The session is closed even when it was
    /// handed over by the caller.
    ///
    /// The requestor only counts as closed once both steps succeed, so a failed close can be
    /// retried.
    pub async fn close(&self) -> Result<(), JmsError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.session.close().await?;
        if let Err(e) = self.temporary_queue.delete().await {
            warn!(reply_to = %self.reply_to.name(), error = %e, "Failed to delete temporary queue");
            return Err(e);
        }
        self.closed.store(true, Ordering::Release);
        debug!(reply_to = %self.reply_to.name(), "Closed queue requestor");
        Ok(())
    }
}

/// Request/reply over the publish/subscribe domain.
///
/// Every subscriber of the target topic may reply; only the first reply is returned.
pub struct TopicRequestor<S: TopicSession> {
    session: S,
    temporary_topic: S::TemporaryTopic,
    reply_to: DestinationRef,
    publisher: S::Publisher,
    subscriber: S::Subscriber,
    closed: AtomicBool,
}

impl<S: TopicSession> TopicRequestor<S> {
    pub async fn new(session: S, topic: Option<DestinationRef>) -> Result<Self, JmsError> {
        let topic = check_target(topic, |d| d.kind().is_topic(), "topic")?;
        check_session(&session)?;

        let temporary_topic = session.create_temporary_topic().await?;
        let reply_to = destination_ref(&temporary_topic);
        let endpoints = async {
            let publisher = session.create_publisher(Some(topic.clone())).await?;
            let subscriber = session
                .create_subscriber(reply_to.clone(), ConsumerOptions::new())
                .await?;
            Ok::<_, JmsError>((publisher, subscriber))
        }
        .await;
        let (publisher, subscriber) = match endpoints {
            Ok(endpoints) => endpoints,
            Err(e) => {
                if let Err(cleanup) = temporary_topic.delete().await {
                    warn!(reply_to = %reply_to.name(), error = %cleanup, "Failed to delete temporary topic");
                }
                return Err(e);
            }
        };
        debug!(topic = %topic.name(), reply_to = %reply_to.name(), "Created topic requestor");

        Ok(Self {
            session,
            temporary_topic,
            reply_to,
            publisher,
            subscriber,
            closed: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn reply_to(&self) -> &DestinationRef {
        &self.reply_to
    }

    pub async fn request(&self, message: &mut Message) -> Result<Option<Message>, JmsError> {
        self.publish(message).await?;
        self.subscriber.receive().await
    }

    pub async fn request_timeout(
        &self,
        message: &mut Message,
        timeout: Duration,
    ) -> Result<Option<Message>, JmsError> {
        self.publish(message).await?;
        self.subscriber.receive_timeout(timeout).await
    }

    async fn publish(&self, message: &mut Message) -> Result<(), JmsError> {
        check_open(&self.closed)?;
        message.headers_mut().set_reply_to(Some(self.reply_to.clone()));
        self.publisher.publish(message).await?;
        debug!(
            message_id = ?message.headers().message_id().map(|id| id.as_str()),
            reply_to = %self.reply_to.name(),
            "Published request"
        );
        Ok(())
    }

    pub async fn close(&self) -> Result<(), JmsError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.session.close().await?;
        if let Err(e) = self.temporary_topic.delete().await {
            warn!(reply_to = %self.reply_to.name(), error = %e, "Failed to delete temporary topic");
            return Err(e);
        }
        self.closed.store(true, Ordering::Release);
        debug!(reply_to = %self.reply_to.name(), "Closed topic requestor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::DestinationKind;
    use crate::error::ErrorKind;
    use crate::loopback::{init_log, Broker, LoopbackSession, LoopbackTemporary};
    use crate::session::AcknowledgeMode;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn queue(session: &LoopbackSession, name: &str) -> Result<DestinationRef, JmsError> {
        Ok(Arc::new(session.create_queue(name)?))
    }

    /// Answers one request on `name` by echoing its text to the reply-to destination.
    async fn spawn_queue_responder(
        broker: &Broker,
        name: &str,
    ) -> Result<tokio::task::JoinHandle<Result<Option<DestinationRef>, JmsError>>, JmsError> {
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let requests = session
            .create_receiver(queue(&session, name)?, None)
            .await?;
        Ok(tokio::spawn(async move {
            let request = match requests.receive_timeout(Duration::from_secs(5)).await? {
                Some(request) => request,
                None => return Ok(None),
            };
            let reply_to = request.headers().reply_to().cloned();
            let text = request.get_text()?.unwrap_or_default().to_uppercase();
            let producer = session.create_producer(None).await?;
            if let Some(reply_to) = &reply_to {
                producer
                    .send_to(Arc::clone(reply_to), &mut Message::text(text), None)
                    .await?;
            }
            Ok::<_, JmsError>(reply_to)
        }))
    }

    #[tokio::test]
    async fn test_queue_requestor_requires_destination() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        assert_eq!(
            QueueRequestor::new(session.clone(), None).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );

        let topic: DestinationRef = Arc::new(session.create_topic("not-a-queue")?);
        assert_eq!(
            QueueRequestor::new(session.clone(), Some(topic)).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );

        let target = queue(&session, "service")?;
        assert!(QueueRequestor::new(session, Some(target)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_requestor_rejects_transacted_session() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::SessionTransacted);
        let target = queue(&session, "service")?;
        assert_eq!(
            QueueRequestor::new(session, Some(target)).await.err().map(|e| e.kind()),
            Some(ErrorKind::IllegalState)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_request_reply() -> Result<(), Box<dyn std::error::Error>> {
        init_log();
        let broker = Broker::new();
        let responder = spawn_queue_responder(&broker, "echo").await?;

        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let target = queue(&session, "echo")?;
        let requestor = QueueRequestor::new(session, Some(target)).await?;

        let mut request = Message::text("ping");
        request.headers_mut().set_correlation_id(Some("req-1".to_owned()));
        let reply = requestor
            .request_timeout(&mut request, Duration::from_secs(5))
            .await?
            .ok_or("no reply")?;
        assert_eq!(reply.get_text()?, Some("PING"));

        let request_reply_to = request.headers().reply_to().ok_or("reply-to not set")?;
        assert!(request_reply_to.same_as(requestor.reply_to().as_ref()));
        assert_eq!(request_reply_to.kind(), DestinationKind::TemporaryQueue);

        let seen = responder.await??.ok_or("responder got no request")?;
        assert!(seen.same_as(requestor.reply_to().as_ref()));
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_request_timeout_without_responder() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let target = queue(&session, "nobody")?;
        let requestor = QueueRequestor::new(session, Some(target)).await?;

        let reply = requestor
            .request_timeout(&mut Message::text("anyone?"), Duration::from_millis(20))
            .await?;
        assert!(reply.is_none());
        assert_eq!(broker.queue_depth("nobody")?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_requestor_close() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let target = queue(&session, "service")?;
        let requestor: QueueRequestor<LoopbackSession> = QueueRequestor::new(session, Some(target)).await?;
        let temporary: LoopbackTemporary = requestor.temporary_queue.clone();

        requestor.close().await?;
        assert!(temporary.is_deleted());
        assert!(requestor.session().is_closed());
        assert_matches!(
            requestor.request(&mut Message::text("late")).await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        requestor.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_requestor_close_reports_delete_failure() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let target = queue(&session, "service")?;
        let requestor: QueueRequestor<LoopbackSession> = QueueRequestor::new(session, Some(target)).await?;
        let temporary: LoopbackTemporary = requestor.temporary_queue.clone();

        let other = broker.session(AcknowledgeMode::AutoAcknowledge);
        let holder = other
            .create_consumer(Arc::clone(requestor.reply_to()), ConsumerOptions::new())
            .await?;
        assert_matches!(
            requestor.close().await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        assert!(requestor.session().is_closed());
        assert!(!temporary.is_deleted());

        holder.close().await?;
        requestor.close().await?;
        assert!(temporary.is_deleted());
        requestor.close().await?;
        Ok(())
    }

    #[derive(Debug, Clone)]
    struct Nameless(DestinationKind);

    impl Destination for Nameless {
        fn name(&self) -> &str {
            ""
        }

        fn kind(&self) -> DestinationKind {
            self.0
        }
    }

    #[tokio::test]
    async fn test_failed_construction_deletes_temporary() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let before = broker.destination_count()?;

        let target: DestinationRef = Arc::new(Nameless(DestinationKind::Queue));
        assert_eq!(
            QueueRequestor::new(session.clone(), Some(target)).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );
        assert_eq!(broker.destination_count()?, before);

        let target: DestinationRef = Arc::new(Nameless(DestinationKind::Topic));
        assert_eq!(
            TopicRequestor::new(session, Some(target)).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );
        assert_eq!(broker.destination_count()?, before);
        Ok(())
    }

    #[tokio::test]
    async fn test_every_request_carries_reply_to() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let target = queue(&session, "audit")?;
        let requestor = QueueRequestor::new(session, Some(target)).await?;

        let other = broker.session(AcknowledgeMode::AutoAcknowledge);
        let stale = queue(&other, "stale-replies")?;
        let mut first = Message::text("one");
        let mut second = Message::text("two");
        second.headers_mut().set_reply_to(Some(stale));
        requestor.request_timeout(&mut first, Duration::from_millis(10)).await?;
        requestor.request_timeout(&mut second, Duration::from_millis(10)).await?;
        assert_eq!(
            second.headers().reply_to().map(|d| d.same_as(requestor.reply_to().as_ref())),
            Some(true)
        );

        let requests = other.create_receiver(queue(&other, "audit")?, None).await?;
        for expected in ["one", "two"] {
            let request = requests.receive_no_wait().await?.ok_or("request not queued")?;
            assert_eq!(request.get_text()?, Some(expected));
            let reply_to = request.headers().reply_to().ok_or("reply-to not set")?;
            assert!(reply_to.same_as(requestor.reply_to().as_ref()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_topic_request_reply() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let responder_session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let service: DestinationRef = Arc::new(responder_session.create_topic("quotes")?);
        let subscriber = responder_session
            .create_subscriber(Arc::clone(&service), ConsumerOptions::new())
            .await?;

        let responder = tokio::spawn(async move {
            let request = subscriber
                .receive_timeout(Duration::from_secs(5))
                .await?
                .ok_or_else(|| JmsError::generic("no request"))?;
            let reply_to = request
                .headers()
                .reply_to()
                .cloned()
                .ok_or_else(|| JmsError::generic("no reply-to"))?;
            let publisher = responder_session.create_publisher(None).await?;
            publisher
                .publish_to(reply_to, &mut Message::text("42.0"), None)
                .await?;
            Ok::<_, JmsError>(())
        });

        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let requestor = TopicRequestor::new(session, Some(service)).await?;
        let mut request = Message::text("ACME");
        let reply = requestor
            .request_timeout(&mut request, Duration::from_secs(5))
            .await?
            .ok_or("no reply")?;
        assert_eq!(reply.get_text()?, Some("42.0"));
        assert_eq!(
            request.headers().reply_to().map(|d| d.kind()),
            Some(DestinationKind::TemporaryTopic)
        );
        responder.await??;

        let temporary = requestor.temporary_topic.clone();
        requestor.close().await?;
        assert!(temporary.is_deleted());
        assert!(requestor.session().is_closed());
        assert_matches!(
            requestor.request(&mut Message::text("late")).await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_topic_requestor_requires_topic() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        assert_eq!(
            TopicRequestor::new(session.clone(), None).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );
        let target = queue(&session, "not-a-topic")?;
        assert_eq!(
            TopicRequestor::new(session, Some(target)).await.err().map(|e| e.kind()),
            Some(ErrorKind::InvalidDestination)
        );
        Ok(())
    }
}
