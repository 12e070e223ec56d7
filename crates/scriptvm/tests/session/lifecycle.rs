use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use anyhow::Result;
use scriptvm::{
    CompletionResult, Error, Interpreter, NullListener, Script, ScriptError, Session,
    SessionConfig, SessionState,
};

use super::common::{Event, Fixture, Recorder, TIMEOUT};

#[test]
fn puts_reaches_listener_before_completion() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("puts 'hi'")?;
    fx.session.enqueue(&script, fx.recorder.on_complete(1))?;
    fx.recorder.wait_completions(1)?;

    assert_eq!(
        fx.recorder.events(),
        vec![
            Event::Log("hi".to_owned()),
            Event::Done(1, CompletionResult::Success)
        ]
    );
    Ok(())
}

#[test]
fn expression_scripts_succeed() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(fx.run("1+1")?, CompletionResult::Success);
    assert!(fx.recorder.errors().is_empty());
    Ok(())
}

#[test]
fn completions_follow_enqueue_order() -> Result<()> {
    let fx = Fixture::new()?;
    let scripts = (0..20)
        .map(|i| Script::from_content(format!("puts({i})")))
        .collect::<Result<Vec<_>, _>>()?;
    let mut seqs = Vec::new();
    for (i, script) in scripts.iter().enumerate() {
        let tag = u32::try_from(i)?;
        seqs.push(fx.session.enqueue(script, fx.recorder.on_complete(tag))?);
    }
    fx.recorder.wait_completions(scripts.len())?;

    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    let expected: Vec<Event> = (0..20u32)
        .flat_map(|i| {
            [
                Event::Log(i.to_string()),
                Event::Done(i, CompletionResult::Success),
            ]
        })
        .collect();
    assert_eq!(fx.recorder.events(), expected);
    Ok(())
}

#[test]
fn raising_script_fails_and_session_stays_usable() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(
        fx.run("raise('ArgumentError', 'bad input')")?,
        CompletionResult::Error
    );
    let errors = fx.recorder.errors();
    assert_eq!(errors.first().map(String::as_str), Some("ArgumentError: bad input"));
    assert!(errors.iter().skip(1).all(|line| line.starts_with("  ")));

    let last = fx.session.last_error().expect("last error recorded");
    assert_eq!(last.class, "ArgumentError");

    assert_eq!(fx.run("puts 'still alive'")?, CompletionResult::Success);
    assert_eq!(fx.recorder.logs(), vec!["still alive"]);
    Ok(())
}

#[test]
fn syntax_errors_are_reported() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(fx.run("this is not lua")?, CompletionResult::Error);
    assert!(fx.recorder.errors()[0].starts_with("SyntaxError: "));
    Ok(())
}

#[test]
fn globals_persist_across_scripts() -> Result<()> {
    let fx = Fixture::new()?;
    fx.run("greeting = 'hello'")?;
    fx.run("puts(greeting .. ' again')")?;
    assert_eq!(fx.recorder.logs(), vec!["hello again"]);
    Ok(())
}

#[test]
fn enqueue_after_destroy_never_calls_back() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("puts 'x'")?;
    fx.session.destroy();
    assert_eq!(fx.session.state(), SessionState::Destroyed);

    let called = Arc::new(AtomicUsize::new(0));
    let counter = called.clone();
    let err = fx
        .session
        .enqueue(&script, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert!(matches!(err, Error::DestroyedSession));
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert_eq!(script.pending(), 0);
    Ok(())
}

#[test]
fn destroy_drains_queued_work() -> Result<()> {
    let fx = Fixture::new()?;
    let slow = Script::from_content("local t = os.clock() while os.clock() - t < 0.05 do end")?;
    for tag in 0..3 {
        fx.session.enqueue(&slow, fx.recorder.on_complete(tag))?;
    }
    fx.session.destroy();

    assert_eq!(
        fx.recorder.completions(),
        vec![
            (0, CompletionResult::Success),
            (1, CompletionResult::Success),
            (2, CompletionResult::Success),
        ]
    );
    assert_eq!(slow.pending(), 0);
    slow.destroy()?;
    Ok(())
}

#[test]
fn concurrent_destroy_waits_for_drain_in_every_caller() -> Result<()> {
    let fx = Fixture::new()?;
    let slow = Script::from_content("local t = os.clock() while os.clock() - t < 0.05 do end")?;
    for tag in 0..4 {
        fx.session.enqueue(&slow, fx.recorder.on_complete(tag))?;
    }

    let barrier = Arc::new(std::sync::Barrier::new(3));
    let callers: Vec<_> = (0..3)
        .map(|_| {
            let session = fx.session.clone();
            let recorder = fx.recorder.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                session.destroy();
                recorder.completions().len()
            })
        })
        .collect();
    for caller in callers {
        let seen = caller.join().map_err(|_| anyhow::anyhow!("destroy caller panicked"))?;
        assert_eq!(seen, 4);
    }
    assert_eq!(slow.pending(), 0);
    Ok(())
}

#[test]
fn destroy_is_idempotent() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(fx.session.state(), SessionState::Created);
    fx.run("x = 1")?;
    assert_eq!(fx.session.state(), SessionState::Running);
    fx.session.destroy();
    fx.session.destroy();
    fx.session.clone().destroy();
    assert!(fx.session.is_destroyed());
    Ok(())
}

#[test]
fn destroy_from_completion_callback() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("puts 'last'")?;
    let session = fx.session.clone();
    let (tx, rx) = mpsc::channel();
    fx.session.enqueue(&script, move |result| {
        session.destroy();
        _ = tx.send(result);
    })?;
    assert_eq!(rx.recv_timeout(TIMEOUT)?, CompletionResult::Success);
    assert!(fx.session.is_destroyed());
    assert!(matches!(
        fx.session.enqueue(&script, |_| {}),
        Err(Error::DestroyedSession)
    ));
    fx.session.destroy();
    Ok(())
}

#[test]
fn script_lifecycle_is_enforced() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("local t = os.clock() while os.clock() - t < 0.2 do end")?;
    let (tx, rx) = mpsc::channel();
    fx.session.enqueue(&script, move |result| {
        _ = tx.send(result);
    })?;
    assert!(matches!(script.destroy(), Err(Error::ScriptBusy)));
    assert_eq!(rx.recv_timeout(TIMEOUT)?, CompletionResult::Success);

    script.destroy()?;
    script.destroy()?;
    assert!(matches!(
        fx.session.enqueue(&script, |_| {}),
        Err(Error::DestroyedScript)
    ));
    Ok(())
}

#[test]
fn script_can_destroy_itself_from_its_callback() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("x = 2")?;
    let handle = script.clone();
    let (tx, rx) = mpsc::channel();
    fx.session.enqueue(&script, move |_| {
        _ = tx.send(handle.destroy().is_ok());
    })?;
    assert!(rx.recv_timeout(TIMEOUT)?);
    assert!(script.is_destroyed());
    Ok(())
}

#[test]
fn concurrent_producers_all_complete() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("n = (n or 0) + 1")?;
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let session = fx.session.clone();
            let script = script.clone();
            thread::spawn(move || -> Result<Vec<u64>> {
                (0..25)
                    .map(|_| -> Result<u64> { Ok(session.enqueue(&script, |_| {})?) })
                    .collect()
            })
        })
        .collect();
    for handle in threads {
        let seqs = handle.join().expect("producer panicked")?;
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
    fx.run("puts(n)")?;
    assert_eq!(fx.recorder.logs(), vec!["100"]);
    Ok(())
}

#[test]
fn panicking_callback_does_not_stop_the_worker() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("x = 1")?;
    fx.session
        .enqueue(&script, |_| panic!("callback failure"))?;
    assert_eq!(fx.run("puts 'after'")?, CompletionResult::Success);
    assert_eq!(fx.recorder.logs(), vec!["after"]);
    Ok(())
}

#[test]
fn invalid_paths_fail_creation() {
    let err = Session::create(
        SessionConfig::new("/no/such/application", "", ""),
        Arc::new(NullListener),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Creation(_)));
}

#[test]
fn empty_scripts_are_rejected() {
    assert!(matches!(Script::from_content("  \n"), Err(Error::EmptyScript)));
}

#[test]
fn capture_can_be_disabled() -> Result<()> {
    let fx = Fixture::new()?;
    fx.session.set_log_capture(false);
    fx.run("puts 'to process stdout'")?;
    assert!(fx.recorder.logs().is_empty());
    fx.session.set_log_capture(true);
    fx.run("puts 'captured'")?;
    assert_eq!(fx.recorder.logs(), vec!["captured"]);
    Ok(())
}

struct Counting(Arc<AtomicUsize>);

impl Interpreter for Counting {
    fn eval(&mut self, source: &str, _name: &str) -> Result<(), ScriptError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        if source.contains("fail") {
            return Err(ScriptError::new("TestError", "asked to fail"));
        }
        Ok(())
    }
}

#[test]
fn custom_interpreters_plug_in() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let recorder = Arc::new(Recorder::default());
    let session = Session::create_with(
        SessionConfig::new(dir.path(), "", ""),
        recorder.clone(),
        move |_, _, _| Ok(Box::new(Counting(counter)) as Box<dyn Interpreter>),
    )?;
    session.enqueue(&Script::from_content("ok")?, recorder.on_complete(1))?;
    session.enqueue(&Script::from_content("fail")?, recorder.on_complete(2))?;
    recorder.wait_completions(2)?;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Done(1, CompletionResult::Success),
            Event::Error("TestError: asked to fail".to_owned()),
            Event::Done(2, CompletionResult::Error),
        ]
    );
    Ok(())
}

#[test]
fn factory_errors_surface_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let err = Session::create_with(
        SessionConfig::new(dir.path(), "", ""),
        Arc::new(NullListener),
        |_, _, _| Err(Error::Creation("no runtime".to_owned())),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Creation(msg) if msg == "no runtime"));
}

#[tokio::test]
async fn run_resolves_with_result() -> Result<()> {
    let fx = Fixture::new()?;
    let ok = Script::from_content("puts 'async'")?;
    let bad = Script::from_content("error('nope')")?;

    let first = fx.session.run(&ok)?;
    let second = fx.session.run(&bad)?;
    assert_eq!(first.await, CompletionResult::Success);
    assert_eq!(second.await, CompletionResult::Error);
    assert_eq!(fx.recorder.logs(), vec!["async"]);

    fx.session.destroy();
    assert!(matches!(fx.session.run(&ok), Err(Error::DestroyedSession)));
    Ok(())
}
