use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use looptimer::{EventLoop, LoopBuilder, RunMode, TimerEvent, TimerHandle};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count_fires(timer: &TimerHandle) -> Rc<Cell<u32>> {
    let fires = Rc::new(Cell::new(0));
    let count = fires.clone();
    timer.on_timeout(move |_: &TimerHandle, status: i32| {
        assert_eq!(status, 0);
        count.set(count.get() + 1);
    });
    fires
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_one_shot_fires_once() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let fires = count_fires(&timer);

    timer.start(0, 0)?;
    assert!(timer.is_active());
    assert_eq!(event_loop.ref_count(), 1);

    let alive = event_loop.run(RunMode::Once).await;
    assert!(!alive);
    assert_eq!(fires.get(), 1);
    assert!(!timer.is_active());
    assert_eq!(event_loop.ref_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_repeating_timer_until_stopped() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let fires = count_fires(&timer);
    timer.start(5, 5)?;

    tokio::select! {
        _ = event_loop.run(RunMode::Default) => panic!("a repeating timer keeps the loop alive"),
        _ = tokio::time::sleep(Duration::from_millis(15)) => {}
    }
    assert!(fires.get() >= 2, "fired {} times", fires.get());
    assert!(timer.is_active());

    timer.stop()?;
    let seen = fires.get();
    assert!(!event_loop.run(RunMode::Default).await);

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(event_loop.run_expired(), 0);
    assert_eq!(fires.get(), seen);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_unstarted_timer_lets_loop_exit() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    assert!(timer.close());
    assert_eq!(event_loop.ref_count(), 0);
    assert!(!event_loop.run(RunMode::Default).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_timer_does_not_hold_loop() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let idle = TimerHandle::new(&event_loop)?;
    let busy = TimerHandle::new(&event_loop)?;
    let idle_fires = count_fires(&idle);
    let busy_fires = count_fires(&busy);
    busy.start(20, 0)?;

    assert!(!event_loop.run(RunMode::Default).await);
    assert_eq!(busy_fires.get(), 1);
    assert_eq!(idle_fires.get(), 0);
    assert!(event_loop.now() >= 20);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_channel_receives_timer_events() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let (sender, receiver) = async_channel::unbounded::<TimerEvent>();
    timer.on_timeout(sender);
    timer.start(10, 10)?;

    for _ in 0..3 {
        assert!(event_loop.run(RunMode::Once).await);
    }
    timer.close();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TimerEvent {
                timer: timer.id(),
                status: 0
            };
            3
        ]
    );
    assert!(receiver.is_closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_does_not_disturb_timer() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let (sender, receiver) = async_channel::bounded::<TimerEvent>(1);
    drop(receiver);
    timer.on_timeout(sender);
    timer.start(1, 0)?;

    assert!(!event_loop.run(RunMode::Default).await);
    assert!(!timer.is_active());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_loops_are_independent() -> anyhow::Result<()> {
    init_logging();
    let first = LoopBuilder::new().with_name("first").build();
    let second = LoopBuilder::new().with_name("second").build();
    let a = TimerHandle::new(&first)?;
    let b = TimerHandle::new(&second)?;
    let a_fires = count_fires(&a);
    let b_fires = count_fires(&b);

    a.start(5, 0)?;
    b.start(5, 5)?;
    assert_eq!(first.ref_count(), 1);
    assert_eq!(second.ref_count(), 1);

    assert!(!first.run(RunMode::Default).await);
    assert_eq!(a_fires.get(), 1);
    assert_eq!(b_fires.get(), 0);
    assert_eq!(second.ref_count(), 1);

    b.close();
    assert!(!second.run(RunMode::Default).await);
    assert_eq!(b_fires.get(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_loop_stop_from_callback() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let fires = Rc::new(Cell::new(0u32));

    let count = fires.clone();
    let handle = event_loop.clone();
    timer.on_timeout(move |_: &TimerHandle, _status: i32| {
        count.set(count.get() + 1);
        handle.stop();
    });
    timer.start(3, 3)?;

    assert!(event_loop.run(RunMode::Default).await);
    assert_eq!(fires.get(), 1);
    assert!(event_loop.run(RunMode::Default).await);
    assert_eq!(fires.get(), 2);

    timer.close();
    assert!(!event_loop.run(RunMode::Default).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_again_rearms_with_repeat_interval() -> anyhow::Result<()> {
    init_logging();
    let event_loop = EventLoop::new();
    let timer = TimerHandle::new(&event_loop)?;
    let fires = count_fires(&timer);

    timer.start(100, 0)?;
    timer.set_repeat(10)?;
    timer.again()?;
    assert_eq!(event_loop.next_timeout(), Some(Duration::from_millis(10)));

    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(event_loop.run_expired(), 1);
    assert_eq!(fires.get(), 1);
    assert!(timer.is_active());

    timer.set_repeat(0)?;
    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(event_loop.run_expired(), 1);
    assert!(!timer.is_active());
    assert_eq!(event_loop.ref_count(), 0);
    Ok(())
}
