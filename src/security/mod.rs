// ABOUTME: Security module grouping the append-only audit log
// ABOUTME: Audit writes are best-effort and never fail the action they describe
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

/// Audit event taxonomy, auditor, and storage contract
pub mod audit;

pub use audit::{AuditEvent, AuditEventType, AuditQuery, AuditSeverity, AuditStore, SecurityAuditor};
