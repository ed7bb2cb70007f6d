extern crate self as utag;

pub mod config;
pub mod error;
pub mod template_loader;
pub mod tpl;
pub mod value;

pub type Result<T> = std::result::Result<T, error::TemplateError>;

pub use config::EngineConfig;
pub use error::TemplateError;
pub use template_loader::{MemorySource, TemplateSource};
pub use tpl::args::{Args, DirectiveCall, Signature};
pub use tpl::ast::Node;
pub use tpl::context::Context;
pub use tpl::engine::{Engine, Template};
pub use tpl::registry::{BlockDirective, DirectiveKind, DirectiveRegistry, DirectiveSpec};
pub use tpl::render::Renderer;
pub use value::{FromValue, Lookup, Object, ToValue, Value, to_value};

pub use utag_macros::{ToValue, template_assets};
