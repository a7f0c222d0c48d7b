use hubcore::{Error, MultipleWaiter, Waiter, joinall, killall, sleep, spawn};
use std::time::Duration;

#[hubcore::test]
async fn test_switch_from_callback() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;
    let waiter = Waiter::new();

    let result = waiter.clone();
    hub.run_callback(move || result.switch("from callback"))?;

    assert!(!waiter.ready());
    assert_eq!(waiter.get().await?, "from callback");
    assert!(waiter.ready());
    Ok(())
}

#[hubcore::test]
async fn test_switch_before_get_is_kept() -> hubcore::Result<()> {
    let waiter = Waiter::new();
    waiter.switch(7)?;

    assert_eq!(waiter.get().await?, 7);
    assert_eq!(waiter.get().await?, 7);
    Ok(())
}

#[hubcore::test]
async fn test_throw_fails_the_waiting_task() -> hubcore::Result<()> {
    let waiter: Waiter<u32> = Waiter::new();

    let thrower = waiter.clone();
    spawn(async move {
        sleep(Duration::from_millis(5)).await?;
        thrower.throw(Error::other("no value"))
    })?;

    let result = waiter.take().await;
    assert!(matches!(result, Err(Error::Other(msg)) if msg == "no value"));
    Ok(())
}

#[hubcore::test]
async fn test_second_switch_is_rejected() -> hubcore::Result<()> {
    let waiter = Waiter::new();

    waiter.switch(1)?;
    assert!(matches!(waiter.switch(2), Err(Error::AlreadySwitched)));
    assert!(matches!(
        waiter.throw(Error::other("late")),
        Err(Error::AlreadySwitched)
    ));

    assert_eq!(waiter.take().await?, 1);
    assert!(matches!(waiter.take().await, Err(Error::ResultTaken)));
    Ok(())
}

#[hubcore::test]
async fn test_second_waiting_task_is_rejected() -> hubcore::Result<()> {
    let waiter: Waiter<()> = Waiter::new();

    let first = waiter.clone();
    let holder = spawn(async move { first.get().await })?;
    sleep(Duration::ZERO).await?;

    let result = waiter.get().await;
    assert!(matches!(result, Err(Error::ConcurrentObjectUse(_))));

    waiter.switch(())?;
    holder.await?;
    Ok(())
}

#[hubcore::test]
async fn test_multiple_waiter_keeps_every_value() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;
    let waiter = MultipleWaiter::new();

    for i in 0..3 {
        let waiter = waiter.clone();
        hub.run_callback(move || {
            waiter.switch(i);
            Ok(())
        })?;
    }

    let mut values = Vec::new();
    for _ in 0..3 {
        values.push(waiter.get().await?);
    }

    assert_eq!(values, vec![0, 1, 2]);
    assert!(waiter.is_empty());
    Ok(())
}

#[hubcore::test]
async fn test_joinall_in_completion_order() -> hubcore::Result<()> {
    let slow = spawn(async {
        sleep(Duration::from_millis(30)).await?;
        Ok(())
    })?;
    let fast = spawn(async {
        sleep(Duration::from_millis(5)).await?;
        Ok(())
    })?;

    let handles = [slow, fast];
    let done = joinall(&handles, None, None).await?;

    assert_eq!(done, vec![handles[1].id(), handles[0].id()]);
    Ok(())
}

#[hubcore::test]
async fn test_joinall_stops_at_count() -> hubcore::Result<()> {
    let fast = spawn(async { Ok(()) })?;
    let never = spawn(async {
        sleep(Duration::from_secs(10)).await?;
        Ok(())
    })?;

    let handles = [fast, never];
    let done = joinall(&handles, Some(Duration::from_secs(1)), Some(1)).await?;
    assert_eq!(done, vec![handles[0].id()]);

    assert!(killall(&handles, Error::Cancelled, None).await?);
    assert!(handles[1].is_ready());
    Ok(())
}

#[hubcore::test]
async fn test_joinall_times_out() -> hubcore::Result<()> {
    let handles = [spawn(async {
        sleep(Duration::from_secs(10)).await?;
        Ok(())
    })?];

    let done = joinall(&handles, Some(Duration::from_millis(10)), None).await?;
    assert!(done.is_empty());

    assert!(killall(&handles, Error::other("shutdown"), None).await?);
    assert!(matches!(handles[0].exception(), Some(Error::Other(_))));
    Ok(())
}
