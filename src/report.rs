//! JSON records written next to a trace by the instrumentation tooling.
//!
//! Neither is needed to decode a trace; they are parsed here so that
//! consumers aggregating decoded events do not need their own readers.

use crate::error::TraceError;
use crate::source::check_file;
use compact_str::CompactString;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use std::path::Path;

/// Static information about one instrumented basic block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Id used in the trace.
    pub id: u32,
    /// Id assigned by the compiler.
    pub clang_id: u32,
    /// Source location (`file:line:column`) of the first instruction.
    pub begin: String,
    pub end: String,
    pub flops: u32,
    pub floating_ld: u32,
    pub floating_st: u32,
}

/// Every basic block of a kernel, as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasicBlockReport {
    pub blocks: Vec<BasicBlock>,
}

impl BasicBlockReport {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_path(path: &Path) -> Result<Self, TraceError> {
        check_file(path)?;
        Ok(Self::from_json(&std::fs::read_to_string(path)?)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn get(&self, id: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRoof {
    pub name: CompactString,
    /// Bytes per second.
    pub peak_bandwidth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRoof {
    pub name: CompactString,
    pub peak_flops_s: f64,
}

/// Measured roofline of a GPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: CompactString,
    pub memory_roofs: Vec<MemoryRoof>,
    pub compute_roofs: Vec<ComputeRoof>,
}

impl GpuInfo {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_path(path: &Path) -> Result<Self, TraceError> {
        check_file(path)?;
        Ok(Self::from_json(&std::fs::read_to_string(path)?)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const REPORT_JSON: &str = indoc! {r#"
        [{"id":0,"clang_id":2,"begin":"/home/sebastien/hip/hipcalc/test/mat_square_instr.cpp:27:13","end":"/home/sebastien/hip/hipcalc/test/mat_square_instr.cpp:27:39","flops": 0,"floating_ld":0,"floating_st":0},{"id":1,"clang_id":5,"begin":"/home/sebastien/hip/hipcalc/test/mat_square_instr.cpp:18:5","end":"/home/sebastien/hip/hipcalc/test/mat_square_instr.cpp:25:25","flops": 1,"floating_ld":0,"floating_st":0}]
    "#};

    const GPU_INFO_JSON: &str = indoc! {r#"
        {"name":"","memory_roofs":[{"name":"memory","peak_bandwidth":0}],"compute_roofs":[{"name":"multiply","peak_flops_s":9.07035e+06},{"name":"add","peak_flops_s":9.26011e+06},{"name":"fma","peak_flops_s":5401.64}]}
    "#};

    #[test]
    fn test_report_round_trip() {
        let report = BasicBlockReport::from_json(REPORT_JSON).unwrap();
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[1].clang_id, 5);
        assert_eq!(report.get(1).map(|block| block.flops), Some(1));
        assert!(report.get(7).is_none());

        // Same document, modulo whitespace
        let expected = REPORT_JSON.trim_end().replace(": ", ":");
        assert_eq!(report.to_json().unwrap(), expected);
    }

    #[test]
    fn test_gpu_info_round_trip() {
        let info = GpuInfo::from_json(GPU_INFO_JSON).unwrap();
        assert_eq!(info.name, "");
        assert_eq!(info.memory_roofs[0].peak_bandwidth, 0.0);
        assert_eq!(info.compute_roofs.len(), 3);
        assert_eq!(info.compute_roofs[0].name, "multiply");
        assert_eq!(info.compute_roofs[0].peak_flops_s, 9_070_350.0);
        assert_eq!(info.compute_roofs[2].peak_flops_s, 5401.64);

        let json = info.to_json().unwrap();
        assert_eq!(GpuInfo::from_json(&json).unwrap(), info);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.json");
        std::fs::write(&path, REPORT_JSON).unwrap();
        assert_eq!(BasicBlockReport::from_path(&path).unwrap().blocks.len(), 2);

        let path = dir.path().join("gpu_info.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(GpuInfo::from_path(&path), Err(TraceError::Json(_))));
        assert!(matches!(
            GpuInfo::from_path(&dir.path().join("missing.json")),
            Err(TraceError::Open(_))
        ));
    }
}
