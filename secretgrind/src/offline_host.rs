//! The offline stand-in for a real DBI host (spec.md §6): answers address
//! lookups from the trace file's recorded symbol table instead of a live
//! debugger's debug-info layer, and never needs to capture a call stack of
//! its own since every event that wants one carries it explicitly.

use rustc_hash::FxHashMap;

use secretgrind_core::host::{AddressDescriber, AddressDescription, DbiHost, StackTraceCapture};
use secretgrind_core::registry::ExecutionContext;

use crate::trace_format::SymbolEntry;

/// A symbol table sorted by address, so a lookup can binary-search for "the
/// last entry starting at or before `addr`" and then check containment.
pub struct OfflineHost {
    pid: u32,
    tid: u32,
    by_addr: FxHashMap<u64, usize>,
    sorted: Vec<SymbolEntry>,
    below_main: bool,
}

impl OfflineHost {
    pub fn new(pid: u32, tid: u32, mut symbols: Vec<SymbolEntry>) -> Self {
        symbols.sort_by_key(|s| s.addr);
        let by_addr = symbols.iter().enumerate().map(|(i, s)| (s.addr, i)).collect();
        Self {
            pid,
            tid,
            by_addr,
            sorted: symbols,
            below_main: false,
        }
    }

    pub fn mark_below_main(&mut self) {
        self.below_main = true;
    }

    fn find(&self, addr: u64) -> Option<&SymbolEntry> {
        if let Some(&i) = self.by_addr.get(&addr) {
            return Some(&self.sorted[i]);
        }
        let idx = self.sorted.partition_point(|s| s.addr <= addr);
        if idx == 0 {
            return None;
        }
        let candidate = &self.sorted[idx - 1];
        (addr < candidate.addr + candidate.size).then_some(candidate)
    }
}

impl AddressDescriber for OfflineHost {
    fn describe(&self, addr: u64) -> AddressDescription {
        match self.find(addr) {
            Some(sym) if sym.class == Some(crate::trace_format::SymbolClass::Stack) => AddressDescription::Stack,
            Some(sym) => AddressDescription::Variable {
                name: sym.name.clone(),
                size: sym.size,
            },
            None => AddressDescription::Unknown {
                class: secretgrind_core::registry::AddrClass::Other,
            },
        }
    }
}

impl StackTraceCapture for OfflineHost {
    fn capture(&self) -> ExecutionContext {
        ExecutionContext::default()
    }
}

impl DbiHost for OfflineHost {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn tid(&self) -> u32 {
        self.tid
    }

    fn is_below_main(&self) -> bool {
        self.below_main
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_format::SymbolClass;

    #[test]
    fn resolves_an_address_inside_a_recorded_variable() {
        let host = OfflineHost::new(
            100,
            1,
            vec![SymbolEntry {
                addr: 0x4000,
                size: 16,
                name: "api_key".to_string(),
                class: None,
            }],
        );
        match host.describe(0x4004) {
            AddressDescription::Variable { name, size } => {
                assert_eq!(name, "api_key");
                assert_eq!(size, 16);
            }
            other => panic!("expected Variable, got {other:?}"),
        }
        assert!(matches!(host.describe(0x5000), AddressDescription::Unknown { .. }));
    }

    #[test]
    fn stack_symbols_describe_as_stack() {
        let host = OfflineHost::new(
            1,
            1,
            vec![SymbolEntry {
                addr: 0x7000,
                size: 8,
                name: "local".to_string(),
                class: Some(SymbolClass::Stack),
            }],
        );
        assert!(matches!(host.describe(0x7000), AddressDescription::Stack));
    }
}
