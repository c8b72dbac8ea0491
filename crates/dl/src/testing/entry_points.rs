use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::ffi::*;
use crate::native::InProcessTable;

pub(super) static GLOBAL_INITIALIZE_CALLS: AtomicUsize = AtomicUsize::new(0);
pub(super) static GLOBAL_SHUTDOWN_CALLS: AtomicUsize = AtomicUsize::new(0);
pub(super) static DOUBLE_DESTROYS: AtomicUsize = AtomicUsize::new(0);
static DESTROY_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Flags every stand-in session knows, with their defaults.
pub const FLAG_DEFAULTS: &[(&str, &str)] = &[
	("iree-input-type", "auto"),
	("iree-hal-target-backends", ""),
	("iree-opt-const-eval", "true"),
	("iree-vm-bytecode-module-strip-source-map", "false"),
	("iree-vm-target-index-bits", "64"),
	("mlir-print-debuginfo", "false"),
];

const SEVERITY_WARNING: c_int = 1;
const SEVERITY_ERROR: c_int = 2;

const BYTECODE_MAGIC: &[u8] = b"IREE";

pub(super) struct Handle {
	/// Position in [`DESTROY_SEQUENCE`] of the first destroy, 0 while alive.
	destroyed_at: AtomicUsize,
	state: Mutex<HandleState>,
}

impl Handle {
	pub(super) fn is_destroyed(&self) -> bool {
		self.destroyed_at() != 0
	}

	pub(super) fn destroyed_at(&self) -> usize {
		self.destroyed_at.load(Ordering::SeqCst)
	}

	pub(super) fn state(&self) -> MutexGuard<'_, HandleState> {
		self.state.lock()
	}

	/// Marks the handle destroyed. Returns false on a double destroy.
	fn mark_destroyed(&self) -> bool {
		let position = DESTROY_SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1;
		if self.destroyed_at.compare_exchange(0, position, Ordering::SeqCst, Ordering::SeqCst).is_err() {
			DOUBLE_DESTROYS.fetch_add(1, Ordering::SeqCst);
			return false;
		}
		true
	}
}

pub(super) enum HandleState {
	Error(CString),
	Session(SessionState),
	Source(SourceState),
	Invocation(InvocationState),
	Output(OutputState),
}

pub(super) struct SessionState {
	values: Vec<String>,
}

impl SessionState {
	fn new() -> Self {
		Self {
			values: FLAG_DEFAULTS.iter().map(|(_, default)| default.to_string()).collect(),
		}
	}

	fn value(&self, name: &str) -> Option<&str> {
		FLAG_DEFAULTS.iter().position(|(flag, _)| *flag == name).map(|index| self.values[index].as_str())
	}

	fn set(&mut self, arg: &str) -> Result<(), String> {
		let Some(flag) = arg.strip_prefix("--") else {
			return Err(format!("flag must start with '--': {arg}"));
		};
		let (name, value) = match flag.split_once('=') {
			Some((name, value)) => (name, Some(value)),
			None => (flag, None),
		};
		let Some(index) = FLAG_DEFAULTS.iter().position(|(known, _)| *known == name) else {
			return Err(format!("unknown command line flag '{name}'"));
		};
		let is_bool = matches!(FLAG_DEFAULTS[index].1, "true" | "false");
		let value = match value {
			Some(value) if is_bool && !matches!(value, "true" | "false") => {
				return Err(format!("invalid boolean value '{value}' for flag '{name}'"));
			}
			Some(value) => value.to_string(),
			None if is_bool => "true".to_string(),
			None => return Err(format!("flag '{name}' requires a value")),
		};
		self.values[index] = value;
		Ok(())
	}
}

enum SourceData {
	File(String),
	Buffer { ptr: *const u8, len: usize, null_terminated: bool },
}

pub(super) struct SourceState {
	name: String,
	data: SourceData,
}

impl SourceState {
	pub(super) fn buffer_ptr(&self) -> Option<*const u8> {
		match self.data {
			SourceData::Buffer { ptr, .. } => Some(ptr),
			SourceData::File(_) => None,
		}
	}

	pub(super) fn null_terminated(&self) -> Option<bool> {
		match self.data {
			SourceData::Buffer { null_terminated, .. } => Some(null_terminated),
			SourceData::File(_) => None,
		}
	}

	/// Reads the source text. Buffers are read in place, so the wrapper must
	/// still hold them.
	fn text(&self) -> Result<String, String> {
		let bytes = match &self.data {
			SourceData::File(contents) => return Ok(contents.clone()),
			SourceData::Buffer { len: 0, .. } => &[][..],
			// SAFETY: the wrapper retains the buffer for the source's lifetime.
			SourceData::Buffer { ptr, len, .. } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
		};
		let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
		String::from_utf8(bytes.to_vec()).map_err(|_| format!("{}: source is not valid UTF-8", self.name))
	}
}

enum DiagnosticsMode {
	Silent,
	Console,
	Callback { callback: DiagnosticCallback, user_data: *mut c_void },
}

enum Stage {
	Created,
	Parsed { body: String },
	Executed { body: String, backends: String },
}

pub(super) struct InvocationState {
	session: *mut RawSession,
	diagnostics: DiagnosticsMode,
	stage: Stage,
}

impl InvocationState {
	fn emit(&self, severity: c_int, message: &str) {
		match self.diagnostics {
			DiagnosticsMode::Silent => {}
			DiagnosticsMode::Console => tracing::warn!(target: "ireec::console", severity, "{message}"),
			// SAFETY: the wrapper keeps `user_data` alive while the invocation exists.
			DiagnosticsMode::Callback { callback, user_data } => unsafe {
				callback(severity, message.as_ptr() as *const c_char, message.len(), user_data)
			},
		}
	}
}

enum OutputTarget {
	File { path: PathBuf, file: Option<File>, keep: bool },
	Membuffer(Vec<u8>),
}

pub(super) struct OutputState {
	target: OutputTarget,
}

impl OutputState {
	fn write(&mut self, bytes: &[u8]) -> Result<(), String> {
		match &mut self.target {
			OutputTarget::File { path, file: Some(file), .. } => file.write_all(bytes).map_err(|e| format!("failed to write {}: {e}", path.display())),
			OutputTarget::File { path, file: None, .. } => Err(format!("output file {} is closed", path.display())),
			OutputTarget::Membuffer(buffer) => {
				buffer.extend_from_slice(bytes);
				Ok(())
			}
		}
	}
}

fn alloc<T>(state: HandleState) -> *mut T {
	Box::into_raw(Box::new(Handle {
		destroyed_at: AtomicUsize::new(0),
		state: Mutex::new(state),
	})) as *mut T
}

/// # Safety
///
/// `raw` must be a handle allocated by this module.
pub(super) unsafe fn handle<'a, T>(raw: *mut T) -> &'a Handle {
	unsafe { &*(raw as *const Handle) }
}

pub(super) fn new_error(message: &str) -> *mut RawError {
	let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
	alloc(HandleState::Error(message))
}

fn fail(message: impl AsRef<str>) -> *mut RawError {
	new_error(message.as_ref())
}

pub(super) fn table() -> InProcessTable {
	InProcessTable {
		global_initialize,
		global_shutdown,
		error_destroy,
		error_get_message,
		session_create,
		session_destroy,
		session_get_flags,
		session_set_flags,
		source_open_file,
		source_wrap_buffer,
		source_destroy,
		invocation_create,
		invocation_destroy,
		invocation_enable_console_diagnostics,
		invocation_parse_source,
		invocation_pipeline,
		invocation_output_ir,
		invocation_output_vm_bytecode,
		output_open_file,
		output_open_membuffer,
		output_destroy,
		output_keep,
		output_write,
		output_map_memory,
		invocation_enable_callback_diagnostics: Some(invocation_enable_callback_diagnostics as InvocationEnableCallbackDiagnosticsFn),
	}
}

unsafe extern "C" fn global_initialize() {
	GLOBAL_INITIALIZE_CALLS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn global_shutdown() {
	GLOBAL_SHUTDOWN_CALLS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn error_destroy(error: *mut RawError) {
	unsafe { handle(error) }.mark_destroyed();
}

unsafe extern "C" fn error_get_message(error: *mut RawError) -> *const c_char {
	match &*unsafe { handle(error) }.state() {
		// The CString lives as long as the never-freed handle.
		HandleState::Error(message) => message.as_ptr(),
		_ => ptr::null(),
	}
}

unsafe extern "C" fn session_create() -> *mut RawSession {
	alloc(HandleState::Session(SessionState::new()))
}

unsafe extern "C" fn session_destroy(session: *mut RawSession) {
	unsafe { handle(session) }.mark_destroyed();
}

unsafe extern "C" fn session_get_flags(session: *mut RawSession, non_default_only: bool, callback: FlagCallback, user_data: *mut c_void) {
	let flags: Vec<String> = match &*unsafe { handle(session) }.state() {
		HandleState::Session(state) => FLAG_DEFAULTS
			.iter()
			.zip(&state.values)
			.filter(|((_, default), value)| !non_default_only || default != value)
			.map(|((name, _), value)| format!("--{name}={value}"))
			.collect(),
		_ => return,
	};
	for flag in flags {
		unsafe { callback(flag.as_ptr() as *const c_char, flag.len(), user_data) };
	}
}

unsafe extern "C" fn session_set_flags(session: *mut RawSession, argc: c_int, argv: *const *const c_char) -> *mut RawError {
	let args: Vec<String> = (0..argc.max(0) as usize)
		.map(|i| unsafe { CStr::from_ptr(*argv.add(i)) }.to_string_lossy().into_owned())
		.collect();
	let mut guard = unsafe { handle(session) }.state();
	let HandleState::Session(state) = &mut *guard else {
		return fail("not a session");
	};
	for arg in &args {
		if let Err(message) = state.set(arg) {
			return fail(format!("Error parsing flags: {message}"));
		}
	}
	ptr::null_mut()
}

unsafe extern "C" fn source_open_file(_session: *mut RawSession, file_path: *const c_char, out_source: *mut *mut RawSource) -> *mut RawError {
	let path = unsafe { CStr::from_ptr(file_path) }.to_string_lossy().into_owned();
	match std::fs::read_to_string(&path) {
		Ok(contents) => {
			let source = alloc(HandleState::Source(SourceState {
				name: path,
				data: SourceData::File(contents),
			}));
			unsafe { *out_source = source };
			ptr::null_mut()
		}
		Err(e) => fail(format!("could not open source file {path}: {e}")),
	}
}

unsafe extern "C" fn source_wrap_buffer(
	_session: *mut RawSession,
	buffer_name: *const c_char,
	buffer: *const c_char,
	length: usize,
	is_null_terminated: bool,
	out_source: *mut *mut RawSource,
) -> *mut RawError {
	let name = unsafe { CStr::from_ptr(buffer_name) }.to_string_lossy().into_owned();
	let source = alloc(HandleState::Source(SourceState {
		name,
		data: SourceData::Buffer {
			ptr: buffer as *const u8,
			len: length,
			null_terminated: is_null_terminated,
		},
	}));
	unsafe { *out_source = source };
	ptr::null_mut()
}

unsafe extern "C" fn source_destroy(source: *mut RawSource) {
	unsafe { handle(source) }.mark_destroyed();
}

unsafe extern "C" fn invocation_create(session: *mut RawSession) -> *mut RawInvocation {
	alloc(HandleState::Invocation(InvocationState {
		session,
		diagnostics: DiagnosticsMode::Silent,
		stage: Stage::Created,
	}))
}

unsafe extern "C" fn invocation_destroy(invocation: *mut RawInvocation) {
	unsafe { handle(invocation) }.mark_destroyed();
}

unsafe extern "C" fn invocation_enable_console_diagnostics(invocation: *mut RawInvocation) {
	if let HandleState::Invocation(state) = &mut *unsafe { handle(invocation) }.state() {
		state.diagnostics = DiagnosticsMode::Console;
	}
}

unsafe extern "C" fn invocation_enable_callback_diagnostics(invocation: *mut RawInvocation, _flags: c_int, callback: DiagnosticCallback, user_data: *mut c_void) {
	if let HandleState::Invocation(state) = &mut *unsafe { handle(invocation) }.state() {
		state.diagnostics = DiagnosticsMode::Callback { callback, user_data };
	}
}

/// Accepts `module { ... }` and returns the trimmed body.
fn parse_module(text: &str) -> Result<String, String> {
	let text = text.trim();
	let rest = text.strip_prefix("module").ok_or_else(|| "expected 'module' op".to_string())?.trim_start();
	let body = rest
		.strip_prefix('{')
		.and_then(|rest| rest.strip_suffix('}'))
		.ok_or_else(|| "expected '{' ... '}' around module body".to_string())?;

	let mut depth = 0i32;
	for c in body.chars() {
		match c {
			'{' => depth += 1,
			'}' => depth -= 1,
			_ => {}
		}
		if depth < 0 {
			return Err("unbalanced '}' in module body".to_string());
		}
	}
	if depth != 0 {
		return Err("unbalanced '{' in module body".to_string());
	}
	Ok(body.trim().to_string())
}

unsafe extern "C" fn invocation_parse_source(invocation: *mut RawInvocation, source: *mut RawSource) -> bool {
	let text = match &*unsafe { handle(source) }.state() {
		HandleState::Source(source) => source.text(),
		_ => Err("not a source".to_string()),
	};

	let mut guard = unsafe { handle(invocation) }.state();
	let HandleState::Invocation(state) = &mut *guard else {
		return false;
	};
	if !matches!(state.stage, Stage::Created) {
		state.emit(SEVERITY_ERROR, "invocation already holds a parsed module");
		return false;
	}
	match text.and_then(|text| parse_module(&text)) {
		Ok(body) => {
			state.stage = Stage::Parsed { body };
			true
		}
		Err(message) => {
			state.emit(SEVERITY_ERROR, &message);
			false
		}
	}
}

unsafe extern "C" fn invocation_pipeline(invocation: *mut RawInvocation, pipeline: c_int) -> bool {
	let mut guard = unsafe { handle(invocation) }.state();
	let HandleState::Invocation(state) = &mut *guard else {
		return false;
	};
	if !matches!(pipeline, 0 | 1) {
		state.emit(SEVERITY_ERROR, &format!("unknown pipeline {pipeline}"));
		return false;
	}
	let body = match &state.stage {
		Stage::Parsed { body } => body.clone(),
		Stage::Executed { .. } => {
			state.emit(SEVERITY_WARNING, "pipeline already ran");
			return true;
		}
		Stage::Created => {
			state.emit(SEVERITY_ERROR, "no module has been parsed");
			return false;
		}
	};

	let backends = match &*unsafe { handle(state.session) }.state() {
		HandleState::Session(session) => session.value("iree-hal-target-backends").unwrap_or_default().to_string(),
		_ => String::new(),
	};
	if body.contains("func.func") && backends.is_empty() {
		state.emit(SEVERITY_ERROR, "no HAL target backends specified (use --iree-hal-target-backends)");
		return false;
	}
	state.stage = Stage::Executed { body, backends };
	true
}

fn write_output(output: *mut RawOutput, bytes: &[u8]) -> *mut RawError {
	match &mut *unsafe { handle(output) }.state() {
		HandleState::Output(state) => state.write(bytes).err().map_or(ptr::null_mut(), fail),
		_ => fail("not an output"),
	}
}

unsafe extern "C" fn invocation_output_ir(invocation: *mut RawInvocation, output: *mut RawOutput) -> *mut RawError {
	let text = match &*unsafe { handle(invocation) }.state() {
		HandleState::Invocation(InvocationState {
			stage: Stage::Parsed { body } | Stage::Executed { body, .. },
			..
		}) if body.is_empty() => "module {\n}".to_string(),
		HandleState::Invocation(InvocationState {
			stage: Stage::Parsed { body } | Stage::Executed { body, .. },
			..
		}) => format!("module {{\n  {body}\n}}"),
		_ => return fail("no module to output"),
	};
	write_output(output, text.as_bytes())
}

unsafe extern "C" fn invocation_output_vm_bytecode(invocation: *mut RawInvocation, output: *mut RawOutput) -> *mut RawError {
	let bytecode = match &*unsafe { handle(invocation) }.state() {
		HandleState::Invocation(InvocationState {
			stage: Stage::Executed { body, backends },
			..
		}) => {
			let mut bytes = BYTECODE_MAGIC.to_vec();
			for section in [backends.as_bytes(), body.as_bytes()] {
				bytes.extend_from_slice(&(section.len() as u32).to_le_bytes());
				bytes.extend_from_slice(section);
			}
			bytes
		}
		_ => return fail("module has not been compiled to VM bytecode"),
	};
	write_output(output, &bytecode)
}

unsafe extern "C" fn output_open_file(file_path: *const c_char, out_output: *mut *mut RawOutput) -> *mut RawError {
	let path = PathBuf::from(unsafe { CStr::from_ptr(file_path) }.to_string_lossy().into_owned());
	match File::create(&path) {
		Ok(file) => {
			let output = alloc(HandleState::Output(OutputState {
				target: OutputTarget::File {
					path,
					file: Some(file),
					keep: false,
				},
			}));
			unsafe { *out_output = output };
			ptr::null_mut()
		}
		Err(e) => fail(format!("could not open output file {}: {e}", path.display())),
	}
}

unsafe extern "C" fn output_open_membuffer(out_output: *mut *mut RawOutput) -> *mut RawError {
	let output = alloc(HandleState::Output(OutputState {
		target: OutputTarget::Membuffer(Vec::new()),
	}));
	unsafe { *out_output = output };
	ptr::null_mut()
}

unsafe extern "C" fn output_destroy(output: *mut RawOutput) {
	let handle = unsafe { handle(output) };
	if !handle.mark_destroyed() {
		return;
	}
	if let HandleState::Output(state) = &mut *handle.state() {
		match &mut state.target {
			OutputTarget::File { path, file, keep } => {
				drop(file.take());
				if !*keep {
					let _ = std::fs::remove_file(&*path);
				}
			}
			OutputTarget::Membuffer(buffer) => *buffer = Vec::new(),
		}
	}
}

unsafe extern "C" fn output_keep(output: *mut RawOutput) {
	if let HandleState::Output(OutputState {
		target: OutputTarget::File { keep, .. },
	}) = &mut *unsafe { handle(output) }.state()
	{
		*keep = true;
	}
}

unsafe extern "C" fn output_write(output: *mut RawOutput, data: *const c_void, length: usize) -> *mut RawError {
	let bytes = if length == 0 {
		&[][..]
	} else {
		unsafe { std::slice::from_raw_parts(data as *const u8, length) }
	};
	write_output(output, bytes)
}

unsafe extern "C" fn output_map_memory(output: *mut RawOutput, contents: *mut *mut c_void, size: *mut u64) -> *mut RawError {
	match &mut *unsafe { handle(output) }.state() {
		HandleState::Output(OutputState {
			target: OutputTarget::Membuffer(buffer),
		}) => {
			unsafe {
				*contents = buffer.as_mut_ptr() as *mut c_void;
				*size = buffer.len() as u64;
			}
			ptr::null_mut()
		}
		HandleState::Output(OutputState {
			target: OutputTarget::File { path, .. },
		}) => fail(format!("cannot map file output {}", path.display())),
		_ => fail("not an output"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn module_grammar() {
		assert_eq!(parse_module("module {}"), Ok(String::new()));
		assert_eq!(parse_module("  module {\n}\n"), Ok(String::new()));
		assert_eq!(
			parse_module("module {func.func @main(%arg0: i32) -> (i32) {return %arg0 : i32}}").as_deref(),
			Ok("func.func @main(%arg0: i32) -> (i32) {return %arg0 : i32}")
		);
		assert!(parse_module("func {}").is_err());
		assert!(parse_module("module {").is_err());
		assert!(parse_module("module {}}").is_err());
	}

	#[test]
	fn session_flag_syntax() {
		let mut session = SessionState::new();
		assert!(session.set("--iree-input-type=none").is_ok());
		assert!(session.set("--mlir-print-debuginfo").is_ok());
		assert_eq!(session.value("mlir-print-debuginfo"), Some("true"));
		assert!(session.set("--iree-input-type").is_err());
		assert!(session.set("--mlir-print-debuginfo=maybe").is_err());
		assert!(session.set("iree-input-type=none").is_err());
		assert!(session.set("--does-not-exist=1").is_err());
	}
}
