use std::{fs, sync::Arc};

use anyhow::Result;
use scriptvm::{CompletionResult, MemoryResolver, SessionConfig};

use super::common::Fixture;

#[test]
fn require_searches_stdlib_and_app_dirs() -> Result<()> {
    let stdlib = tempfile::tempdir()?;
    fs::write(
        stdlib.path().join("greet.lua"),
        "return { hello = function(n) return 'hello ' .. n end }",
    )?;
    let stdlib_path = stdlib.path().to_path_buf();
    let fx = Fixture::with_config(move |app| {
        fs::create_dir_all(app.join("app")).unwrap();
        fs::write(app.join("app/init.lua"), "return { name = 'world' }").unwrap();
        SessionConfig::new(app, stdlib_path, "")
    })?;

    assert_eq!(
        fx.run("local g = require('greet')\nlocal a = require('app')\nputs(g.hello(a.name))")?,
        CompletionResult::Success
    );
    assert_eq!(fx.recorder.logs(), vec!["hello world"]);
    Ok(())
}

#[test]
fn engine_table_exposes_paths() -> Result<()> {
    let fx = Fixture::new()?;
    fx.run("puts(engine.app_path)")?;
    assert_eq!(
        fx.recorder.logs(),
        vec![fx.dir.path().to_string_lossy().into_owned()]
    );
    Ok(())
}

fn memory_assets() -> Arc<MemoryResolver> {
    Arc::new(
        MemoryResolver::new()
            .with_file("lib/shapes.lua", "return { sides = 4 }")
            .with_file("data/config.txt", "from-assets")
            .with_file("data/run.lua", "puts('ran ' .. ...)")
            .with_file("data/nested/value.txt", "deep"),
    )
}

#[test]
fn resolver_is_consulted_before_the_filesystem() -> Result<()> {
    let fx = Fixture::with_config(|app| {
        fs::create_dir_all(app.join("data")).unwrap();
        fs::write(app.join("data/config.txt"), "from-disk").unwrap();
        fs::write(app.join("data/disk-only.txt"), "disk").unwrap();
        SessionConfig::new(app, "", "").with_resolver(memory_assets())
    })?;

    let result = fx.run(
        r#"
        puts(fs.read('data/config.txt'))
        puts(fs.read('data/disk-only.txt'))
        puts(fs.exists('data/nested'), fs.is_directory('data/nested'), fs.exists('nope'))
        puts(table.concat(fs.list('data'), ','))
        local missing, err = fs.read('nope.txt')
        puts(missing == nil, err ~= nil)
        puts(require('lib.shapes').sides)
        "#,
    )?;
    assert_eq!(result, CompletionResult::Success, "{:?}", fx.recorder.errors());
    assert_eq!(
        fx.recorder.logs(),
        vec![
            "from-assets",
            "disk",
            "true",
            "true",
            "false",
            "config.txt,disk-only.txt,nested,run.lua",
            "true",
            "true",
            "4",
        ]
    );
    Ok(())
}

#[test]
fn loadfile_and_dofile_use_the_overlay() -> Result<()> {
    let fx = Fixture::with_config(|app| SessionConfig::new(app, "", "").with_resolver(memory_assets()))?;
    fx.run("loadfile('data/run.lua')('once')\nfs.chdir('data')\nassert(fs.cwd() == 'data')\nloadfile('run.lua')('twice')")?;
    assert_eq!(fx.recorder.logs(), vec!["ran once", "ran twice"]);
    assert_eq!(
        fx.run("dofile('missing.lua')")?,
        CompletionResult::Error
    );
    Ok(())
}

#[test]
fn working_directory_is_per_session() -> Result<()> {
    let assets = memory_assets();
    let a = Fixture::with_config({
        let assets = assets.clone();
        move |app| SessionConfig::new(app, "", "").with_resolver(assets)
    })?;
    let b = Fixture::with_config(move |app| SessionConfig::new(app, "", "").with_resolver(assets))?;

    a.run("assert(fs.chdir('data/nested'))")?;
    a.run("puts(fs.read('value.txt'))")?;
    b.run("puts(fs.cwd() == '', fs.exists('value.txt'))")?;
    assert_eq!(a.recorder.logs(), vec!["deep"]);
    assert_eq!(b.recorder.logs(), vec!["true", "false"]);
    Ok(())
}

#[cfg(feature = "archive")]
#[test]
fn zip_archive_serves_modules() -> Result<()> {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    let archive_dir = tempfile::tempdir()?;
    let archive_path = archive_dir.path().join("assets.zip");
    let mut writer = zip::ZipWriter::new(fs::File::create(&archive_path)?);
    writer.add_directory("pkg/", SimpleFileOptions::default())?;
    writer.start_file("pkg/mathx.lua", SimpleFileOptions::default())?;
    writer.write_all(b"return { double = function(x) return x * 2 end }")?;
    writer.start_file("notes.txt", SimpleFileOptions::default())?;
    writer.write_all(b"zipped")?;
    writer.finish()?;

    let fx = Fixture::with_config(move |app| SessionConfig::new(app, "", "").with_archive(archive_path))?;
    let result = fx.run("puts(require('pkg.mathx').double(21))\nputs(fs.read('notes.txt'))")?;
    assert_eq!(result, CompletionResult::Success, "{:?}", fx.recorder.errors());
    assert_eq!(fx.recorder.logs(), vec!["42", "zipped"]);
    Ok(())
}
