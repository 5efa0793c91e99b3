//! Opcode profiler
//!
//! Counts how often each opcode is interpreted, to see where analysis time
//! goes on a given program.

use std::collections::HashMap;
use std::fmt::Write;

use pyflow_bytecode::OpName;

/// Per-interpreter opcode counters.
#[derive(Debug, Clone, Default)]
pub struct OpcodeProfile {
    enabled: bool,
    counts: HashMap<OpName, u64>,
}

impl OpcodeProfile {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counts: HashMap::new(),
        }
    }

    /// Enable opcode profiling
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disable opcode profiling
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an opcode execution
    #[inline]
    pub fn record(&mut self, name: OpName) {
        if !self.enabled {
            return;
        }
        *self.counts.entry(name).or_insert(0) += 1;
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Counts by opcode, most frequent first. Ties are ordered by name.
    pub fn results(&self) -> Vec<(OpName, u64)> {
        let mut results: Vec<(OpName, u64)> = self.counts.iter().map(|(k, v)| (*k, *v)).collect();
        results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        results
    }

    /// Top opcodes as a table.
    pub fn report(&self) -> String {
        let results = self.results();
        let total = self.total();
        let mut out = String::new();
        let _ = writeln!(out, "=== Opcode Profile ===");
        let _ = writeln!(out, "Total opcodes executed: {}", total);
        let _ = writeln!(out, "{:<25} {:>12} {:>10}", "Opcode", "Count", "Percent");
        let _ = writeln!(out, "{}", "-".repeat(50));
        for (i, (name, count)) in results.iter().take(20).enumerate() {
            let percent = if total == 0 {
                0.0
            } else {
                (*count as f64 / total as f64) * 100.0
            };
            let _ = writeln!(
                out,
                "{:2}. {:<22} {:>12} {:>9.2}%",
                i + 1,
                name.to_string(),
                count,
                percent
            );
        }
        let _ = writeln!(out, "{}", "=".repeat(50));
        out
    }
}
