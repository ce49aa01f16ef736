//! # Scan Payload Classification
//!
//! Every frame read from a scanner is one decoded text line (the "QR code").
//! This module decides, for exactly one line, which kind of scan it is, so the
//! dispatcher can route it to exactly one handler.
//!
//! ## Classification Order
//!
//! Priority-ordered, first match wins, no fallthrough:
//!
//! 1. End sentinel or a repeat of the last accepted instruction
//! 2. Status/rework code (fixed table)
//! 3. Process code (`P` + 4 alphanumerics)
//! 4. Worker code (`WCD` + digits)
//! 5. Indirect-work code (`ID:code-factory`)
//! 6. Standard instruction code (fixed-offset field extraction succeeds)
//! 7. Anything else → unrecognized
//!
//! Classification is total and side-effect free; the handlers own all state.

pub mod fields;

use fields::InstructionFields;

/// Sentinel payload that ends the current work session.
pub const END_SENTINEL: &str = "END*END*END";

/// Status label used when a standard instruction opens without a pending
/// status override.
pub const DEFAULT_STATUS_LABEL: &str = "operation";

/// Fixed status/rework table: scanned code → persisted/display label.
const STATUS_TABLE: &[(&str, &str)] = &[
    ("rew_own_fix", "touch-up"),
    ("rew_material", "material defect"),
    ("rew_process", "process defect"),
    ("rew_equipm", "equipment defect"),
    ("rework", "rework"),
];

/// Look up a scanned status/rework code in the fixed table.
pub fn status_label(code: &str) -> Option<&'static str> {
    STATUS_TABLE
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, label)| *label)
}

/// One classified scan line.
#[derive(Debug, Clone, PartialEq)]
pub enum QrKind<'a> {
    /// `END*END*END` or a repeat of the port's last accepted instruction.
    EndOrSame,
    /// A status/rework annotation; carries the resolved label.
    StatusCode(&'static str),
    /// A process code (`Pxxxx`); the full payload is the process id.
    ProcessCode,
    /// A worker code; carries the numeric worker id (digits after `WCD`).
    WorkerCode(&'a str),
    /// An indirect-work code; `factory` is absent when the payload has no `-` part.
    IndirectWork {
        code: &'a str,
        factory: Option<&'a str>,
    },
    /// A standard instruction code with successfully extracted fields.
    Instruction(InstructionFields),
    /// Catch-all: routed to the fallback/error handler.
    Unrecognized,
}

fn is_process_code(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() == 5
        && bytes[0] == b'P'
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn worker_id(line: &str) -> Option<&str> {
    let digits = line.strip_prefix("WCD")?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

fn indirect_parts(line: &str) -> Option<(&str, Option<&str>)> {
    let rest = line.strip_prefix("ID:")?;
    match rest.split_once('-') {
        Some((code, factory)) if !factory.is_empty() => Some((code, Some(factory))),
        Some((code, _)) => Some((code, None)),
        None => Some((rest, None)),
    }
}

/// Classify one decoded scan line.
///
/// `last_instruction` is the port's most recently accepted standard
/// instruction, used to detect duplicate scans (branch 1).
pub fn classify<'a>(line: &'a str, last_instruction: Option<&str>) -> QrKind<'a> {
    if line == END_SENTINEL || Some(line) == last_instruction {
        return QrKind::EndOrSame;
    }
    if let Some(label) = status_label(line) {
        return QrKind::StatusCode(label);
    }
    if is_process_code(line) {
        return QrKind::ProcessCode;
    }
    if let Some(id) = worker_id(line) {
        return QrKind::WorkerCode(id);
    }
    if let Some((code, factory)) = indirect_parts(line) {
        return QrKind::IndirectWork { code, factory };
    }
    match fields::extract(line) {
        Ok(extracted) => QrKind::Instruction(extracted),
        Err(_) => QrKind::Unrecognized,
    }
}
