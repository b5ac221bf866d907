//! Shared utility functions for debate-forge.
//!
//! Currently the low-level JSON passes used to parse model output.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, extract_from_json_code_block, find_json_object, find_matching_brace,
    strip_tool_artifacts, JsonExtractionResult, JsonStructureAnalysis, TOOL_ARTIFACT_TAGS,
};
