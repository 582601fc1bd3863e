// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backtrace capture and parsing into crash frames.

use std::backtrace::Backtrace;

use beacon_trace_core::CrashFrame;
use rustc_demangle::demangle;

/// Captures the calling thread's stack.
pub fn capture_frames() -> Vec<CrashFrame> {
	let backtrace = Backtrace::force_capture();
	parse_backtrace(&format!("{:#}", backtrace))
}

/// Parses the text form of a std backtrace.
///
/// Frames belonging to the capture and panic machinery at the top of the
/// stack are skipped. Sequence numbers start at zero with the innermost
/// remaining frame.
pub fn parse_backtrace(text: &str) -> Vec<CrashFrame> {
	let mut symbols: Vec<(String, Option<String>)> = Vec::new();

	for line in text.lines() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}

		if let Some(location) = line.strip_prefix("at ") {
			if let Some((_, slot)) = symbols.last_mut() {
				if slot.is_none() {
					*slot = Some(location.trim().to_string());
				}
			}
			continue;
		}

		if let Some(symbol) = frame_symbol(line) {
			symbols.push((clean_symbol(symbol), None));
		}
	}

	symbols
		.into_iter()
		.skip_while(|(symbol, _)| !is_in_app_frame(symbol))
		.enumerate()
		.map(|(sequence, (symbol, location))| build_frame(&symbol, location.as_deref(), sequence as u32))
		.collect()
}

/// `"  5: my_app::main"` yields `"my_app::main"`.
fn frame_symbol(line: &str) -> Option<&str> {
	let (index, symbol) = line.split_once(':')?;
	index.trim().parse::<u32>().ok()?;
	let symbol = symbol.trim();
	(!symbol.is_empty()).then_some(symbol)
}

fn clean_symbol(symbol: &str) -> String {
	let demangled = format!("{:#}", demangle(symbol));
	strip_hash(&demangled).to_string()
}

/// Removes a trailing `::h0123456789abcdef` symbol hash.
fn strip_hash(symbol: &str) -> &str {
	match symbol.rsplit_once("::h") {
		Some((path, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => path,
		_ => symbol,
	}
}

fn build_frame(symbol: &str, location: Option<&str>, sequence_number: u32) -> CrashFrame {
	let (package, function) = match symbol.rfind("::") {
		Some(idx) => (symbol[..idx].to_string(), symbol[idx + 2..].to_string()),
		None => (String::new(), symbol.to_string()),
	};
	let (filename, line_number) = location.map(parse_location).unwrap_or((String::new(), -1));

	CrashFrame {
		package,
		function,
		filename,
		line_number,
		sequence_number,
	}
}

/// `"./src/main.rs:3:5"` yields `("./src/main.rs", 3)`.
fn parse_location(location: &str) -> (String, i32) {
	let mut parts = location.rsplitn(3, ':');
	let column = parts.next();
	let line = parts.next();
	let file = parts.next();

	match (file, line, column) {
		(Some(file), Some(line), Some(column)) if column.parse::<u32>().is_ok() => {
			(file.to_string(), line.parse().unwrap_or(-1))
		}
		_ => match location.rsplit_once(':') {
			Some((file, line)) if line.parse::<i32>().is_ok() => {
				(file.to_string(), line.parse().unwrap_or(-1))
			}
			_ => (location.to_string(), -1),
		},
	}
}

/// Frames from the standard library, the async runtime and the unwinder do
/// not belong to the application.
pub fn is_in_app_frame(function: &str) -> bool {
	const SYSTEM_PREFIXES: &[&str] = &[
		"std::",
		"core::",
		"alloc::",
		"<std::",
		"<core::",
		"<alloc::",
		"tokio::",
		"<tokio::",
		"backtrace::",
		"<backtrace::",
		"panic_unwind::",
		"<panic_unwind::",
		"rust_begin_unwind",
		"rust_panic",
		"__rust_",
		"_rust_",
		"beacon_trace::backtrace::",
		"beacon_trace::fault::",
		"<beacon_trace::fault::",
	];

	const SYSTEM_CONTAINS: &[&str] = &["::panicking::", "::sys_common::", "::rt::lang_start"];

	if SYSTEM_PREFIXES.iter().any(|p| function.starts_with(p)) {
		return false;
	}
	!SYSTEM_CONTAINS.iter().any(|c| function.contains(c))
}
