//! Framework layer - Processing and lifecycle.
//!
//! This module contains the parts applications build on:
//! - The hook pipeline with named, prioritized stages
//! - Extensions: named bundles of hook bindings
//! - The component registry with dependency-ordered initialization

pub mod extension;
pub mod hook;
pub mod registry;

pub use extension::{Extension, ExtensionBuilder, HookBinding, StaticExtension};
pub use hook::{
    BoxedHook, FnHook, Hook, HookPipeline, HookRegistration, HookResult, hook_fn, stages,
    validate_stage_name,
};
pub use registry::{
    AsAny, BootContext, BoxedComponent, Component, ComponentDescriptor, ComponentFactory,
    ComponentRegistry, ComponentState, Dependency, InitContext,
};
