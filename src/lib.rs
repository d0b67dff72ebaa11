//! docgather - document processing engine.
//!
//! Ingests heterogeneous user files, drives each one through a reactive
//! per-document state machine (conversion, pre-analysis, rasterization,
//! OCR pre-filter, LLM OCR, classification, structured normalization),
//! and persists the structured record with billing and lifecycle state.

pub mod config;
pub mod engine;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod queue;
pub mod server;
pub mod services;
pub mod storage;
pub mod subtasks;
pub mod taxonomy;
pub mod tools;
pub mod utils;
