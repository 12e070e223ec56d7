use std::{path::Path, sync::Arc};

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};
use parking_lot::Mutex;

use super::{Interpreter, ScriptError};
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    overlay::{Overlay, ResolveContext},
    relay::{Relay, Stream},
};

const PRELUDE: &str = include_str!("prelude.lua");
const PRELUDE_CHUNK: &str = "=prelude";

/// Lua 5.4 runtime with output routed through a [`Relay`].
pub struct LuaInterpreter {
    runner: Function,
    lua: Lua,
}

impl LuaInterpreter {
    pub fn new(config: &SessionConfig, relay: Relay, session_id: u64) -> Result<Self> {
        config.validate()?;
        let overlay = Arc::new(Mutex::new(Overlay::new(
            config.open_resolver()?,
            ResolveContext::new(config.app_path()),
        )));

        // SAFETY: the state is confined to the creating thread, and loading C
        // modules from the native extension directory requires the
        // unrestricted standard library.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::default()) };
        let runner = install(&lua, config, relay, overlay, session_id)
            .map_err(|e| Error::Creation(format!("interpreter setup failed: {e}")))?;
        Ok(Self { runner, lua })
    }

    fn compile(&self, source: &str, name: &str) -> Result<Function, ScriptError> {
        let chunk_name = format!("={name}");
        // Expressions are accepted on their own, so `1+1` is a valid script.
        if let Ok(func) = self
            .lua
            .load(format!("return {source}"))
            .set_name(chunk_name.as_str())
            .into_function()
        {
            return Ok(func);
        }
        self.lua
            .load(source)
            .set_name(chunk_name)
            .into_function()
            .map_err(script_error)
    }
}

impl Interpreter for LuaInterpreter {
    fn eval(&mut self, source: &str, name: &str) -> Result<(), ScriptError> {
        let chunk = self.compile(source, name)?;
        let (ok, detail) = self
            .runner
            .call::<(bool, Value)>(chunk)
            .map_err(script_error)?;
        if ok {
            return Ok(());
        }
        Err(match detail {
            Value::Table(detail) => describe(&detail),
            _ => ScriptError::new("RuntimeError", "unknown error"),
        })
    }
}

fn install(
    lua: &Lua,
    config: &SessionConfig,
    relay: Relay,
    overlay: Arc<Mutex<Overlay>>,
    session_id: u64,
) -> mlua::Result<Function> {
    let globals = lua.globals();

    let package: Table = globals.get("package")?;
    package.set(
        "path",
        search_path(&[config.app_path(), config.stdlib_dir()]),
    )?;
    package.set("cpath", native_path(config.native_dir()))?;

    let engine = lua.create_table()?;
    engine.set("app_path", config.app_path().to_string_lossy().as_ref())?;
    engine.set("stdlib_dir", config.stdlib_dir().to_string_lossy().as_ref())?;
    engine.set("native_dir", config.native_dir().to_string_lossy().as_ref())?;
    engine.set("session", session_id)?;
    globals.set("engine", engine)?;

    let host = lua.create_table()?;
    host.set(
        "write",
        lua.create_function(move |_, (stream, text): (u8, mlua::String)| {
            let stream = if stream == 2 {
                Stream::Stderr
            } else {
                Stream::Stdout
            };
            relay.write(stream, &text.as_bytes());
            Ok(())
        })?,
    )?;

    let fs = overlay.clone();
    host.set(
        "exists",
        lua.create_function(move |_, path: String| Ok(fs.lock().exists(&path)))?,
    )?;

    let fs = overlay.clone();
    host.set(
        "is_directory",
        lua.create_function(move |_, path: String| Ok(fs.lock().is_directory(&path)))?,
    )?;

    let fs = overlay.clone();
    host.set(
        "read",
        lua.create_function(move |lua, path: String| {
            let result = fs.lock().read(&path);
            match result {
                Ok(bytes) => Ok((Some(lua.create_string(&bytes)?), None)),
                Err(e) => Ok((None, Some(format!("{path}: {e}")))),
            }
        })?,
    )?;

    let fs = overlay.clone();
    host.set(
        "list",
        lua.create_function(move |_, path: String| {
            let result = fs.lock().enumerate(&path);
            match result {
                Ok(names) => Ok((Some(names), None)),
                Err(e) => Ok((None, Some(format!("{path}: {e}")))),
            }
        })?,
    )?;

    let fs = overlay.clone();
    host.set(
        "chdir",
        lua.create_function(move |_, path: String| match fs.lock().chdir(&path) {
            Ok(()) => Ok((Some(true), None)),
            Err(e) => Ok((None, Some(e.to_string()))),
        })?,
    )?;

    let fs = overlay.clone();
    host.set(
        "cwd",
        lua.create_function(move |_, ()| Ok(fs.lock().context().cwd().to_owned()))?,
    )?;

    host.set(
        "module",
        lua.create_function(move |lua, path: String| {
            let source = overlay.lock().module_source(&path);
            source.map(|bytes| lua.create_string(&bytes)).transpose()
        })?,
    )?;

    lua.load(PRELUDE)
        .set_name(PRELUDE_CHUNK)
        .call::<Function>(host)
}

fn search_path(dirs: &[&Path]) -> String {
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| {
            let dir = dir.display();
            [format!("{dir}/?.lua"), format!("{dir}/?/init.lua")]
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn native_path(dir: &Path) -> String {
    if dir.as_os_str().is_empty() {
        return String::new();
    }
    format!("{}/?.{}", dir.display(), std::env::consts::DLL_EXTENSION)
}

fn describe(detail: &Table) -> ScriptError {
    let class = detail
        .get::<Option<String>>("class")
        .ok()
        .flatten()
        .unwrap_or_else(|| "RuntimeError".to_owned());
    let message = detail
        .get::<Option<String>>("message")
        .ok()
        .flatten()
        .unwrap_or_default();
    let backtrace = detail
        .get::<Option<String>>("traceback")
        .ok()
        .flatten()
        .map(|trace| parse_traceback(&trace))
        .unwrap_or_default();
    ScriptError {
        class,
        message,
        backtrace,
    }
}

fn parse_traceback(trace: &str) -> Vec<String> {
    trace
        .lines()
        .map(str::trim)
        .filter(|frame| {
            !frame.is_empty()
                && *frame != "stack traceback:"
                && *frame != "[C]: in ?"
                && !frame.starts_with("prelude:")
                && !frame.starts_with("[C]: in function 'xpcall'")
        })
        .map(str::to_owned)
        .collect()
}

fn script_error(error: mlua::Error) -> ScriptError {
    match error {
        mlua::Error::SyntaxError { message, .. } => ScriptError::new("SyntaxError", message),
        mlua::Error::MemoryError(message) => ScriptError::new("NoMemoryError", message),
        other => ScriptError::new("RuntimeError", other.to_string()),
    }
}
