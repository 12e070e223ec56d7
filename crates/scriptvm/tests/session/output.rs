use anyhow::{Context, Result};
use scriptvm::{CompletionResult, Script};

use super::common::{Event, Fixture};

#[test]
fn partial_line_is_flushed_before_completion() -> Result<()> {
    let fx = Fixture::new()?;
    let script = Script::from_content("io.write('no newline')")?;
    fx.session.enqueue(&script, fx.recorder.on_complete(7))?;
    fx.recorder.wait_completions(1)?;
    assert_eq!(
        fx.recorder.events(),
        vec![
            Event::Log("no newline".to_owned()),
            Event::Done(7, CompletionResult::Success),
        ]
    );
    Ok(())
}

#[test]
fn stdout_and_stderr_are_separate_channels() -> Result<()> {
    let fx = Fixture::new()?;
    fx.run("puts 'out'\nio.stderr:write('err one\\nerr two\\n')\nprint('a', 'b')")?;
    assert_eq!(fx.recorder.logs(), vec!["out", "a\tb"]);
    assert_eq!(fx.recorder.errors(), vec!["err one", "err two"]);
    Ok(())
}

#[test]
fn output_before_an_error_is_kept() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(
        fx.run("io.write('half')\nerror('stop')")?,
        CompletionResult::Error
    );
    let events = fx.recorder.events();
    assert_eq!(events[0], Event::Log("half".to_owned()));
    let Event::Error(summary) = &events[1] else {
        panic!("expected error line, got {:?}", events[1]);
    };
    assert!(summary.starts_with("RuntimeError: "), "{summary}");
    assert!(summary.contains("stop"), "{summary}");
    Ok(())
}

#[test]
fn puts_prints_each_argument_on_its_own_line() -> Result<()> {
    let fx = Fixture::new()?;
    fx.run("puts('a', 2, nil, 'done\\n')\nputs()")?;
    assert_eq!(fx.recorder.logs(), vec!["a", "2", "nil", "done", ""]);
    Ok(())
}

#[test]
fn errors_caught_by_the_script_are_not_reported() -> Result<()> {
    let fx = Fixture::new()?;
    let result = fx.run(
        "local ok, err = pcall(raise, 'KeyError', 'missing')\nputs(ok, tostring(err))",
    )?;
    assert_eq!(result, CompletionResult::Success);
    assert_eq!(fx.recorder.logs(), vec!["false", "KeyError: missing"]);
    assert!(fx.recorder.errors().is_empty());
    assert!(fx.session.last_error().is_none());
    Ok(())
}

#[test]
fn warn_goes_to_error_channel() -> Result<()> {
    let fx = Fixture::new()?;
    fx.run("warn('@on')\nwarn('careful ', 'now')")?;
    assert_eq!(fx.recorder.errors(), vec!["careful now"]);
    Ok(())
}

#[test]
fn multiline_error_messages_arrive_one_line_per_call() -> Result<()> {
    let fx = Fixture::new()?;
    assert_eq!(
        fx.run("require('no_such_module_anywhere')")?,
        CompletionResult::Error
    );
    let errors = fx.recorder.errors();
    assert!(errors.len() > 1, "{errors:?}");
    assert!(errors[0].starts_with("RuntimeError: "), "{errors:?}");
    assert!(errors[0].contains("no_such_module_anywhere"), "{errors:?}");
    assert!(errors.iter().all(|line| !line.contains('\n')), "{errors:?}");

    fx.run("error('first\\nsecond', 0)")?;
    let errors = fx.recorder.errors();
    let at = errors
        .iter()
        .position(|line| line == "RuntimeError: first")
        .context("summary line missing")?;
    assert_eq!(errors[at + 1], "second");
    Ok(())
}
