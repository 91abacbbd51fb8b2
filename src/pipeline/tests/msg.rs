use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::PipelineError;
use crate::pipeline::{Drain, Msg, MsgBody, MsgFactory, MsgPoolSizes};

fn factory(audio: usize, control: usize) -> MsgFactory {
    MsgFactory::new(MsgPoolSizes { audio, control })
}

#[test]
fn test_try_create_exhausts_pool() {
    let factory = factory(1, 1);

    let first = factory
        .try_create(MsgBody::Silence {
            stream_id: 1,
            jiffies: 10,
        })
        .unwrap();
    assert!(first.is_pooled());
    assert_eq!(factory.available_audio(), 0);

    let result = factory.try_create(MsgBody::Silence {
        stream_id: 1,
        jiffies: 10,
    });
    assert_eq!(result.unwrap_err(), PipelineError::PoolExhausted { capacity: 1 });

    // Control pool is separate
    assert!(factory.try_create(MsgBody::Quit).is_ok());

    drop(first);
    assert_eq!(factory.available_audio(), 1);
}

#[tokio::test]
async fn test_create_waits_for_release() {
    let factory = factory(4, 1);
    let held = factory.create(MsgBody::Halt { id: 1 }).await.unwrap();

    let waiting = tokio::time::timeout(
        Duration::from_millis(20),
        factory.create(MsgBody::Halt { id: 2 }),
    )
    .await;
    assert!(waiting.is_err());

    drop(held);
    let msg = factory.create(MsgBody::Halt { id: 2 }).await.unwrap();
    assert!(matches!(msg.body(), MsgBody::Halt { id: 2 }));
}

#[tokio::test]
async fn test_attach_gives_generated_message_a_slot() {
    let factory = factory(2, 2);
    let mut msg = Msg::new(MsgBody::Delay { jiffies: 5 });
    assert!(!msg.is_pooled());

    factory.attach(&mut msg).await.unwrap();
    assert!(msg.is_pooled());
    assert_eq!(factory.available_control(), 1);

    // Attaching twice keeps the same slot
    factory.attach(&mut msg).await.unwrap();
    assert_eq!(factory.available_control(), 1);
}

#[tokio::test]
async fn test_closed_factory() {
    let factory = factory(0, 0);
    factory.close();
    let result = factory.create(MsgBody::Quit).await;
    assert_eq!(result.unwrap_err(), PipelineError::Closed);
}

#[test]
fn test_drain_completes_once() {
    let (tx, mut rx) = oneshot::channel();
    let mut drain = Drain::new(1, tx);
    assert!(!drain.is_complete());

    drain.complete();
    drain.complete();
    assert!(drain.is_complete());
    assert!(rx.try_recv().is_ok());
}
