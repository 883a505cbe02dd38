//! # tgconf - include-chain resolution for terragrunt style configuration
//!
//! ## Introduction for developers
//!
//! Read this to understand how `tgconf` works internally.
//!
//! ### Documents and include chains
//!
//! Every deployable unit has a configuration document (`terragrunt.hcl`). A document may include a parent document,
//! which may include another one, and so on:
//!
//! ```hcl
//! # live/prod/vpc/terragrunt.hcl
//! include {
//!   path = find_in_parent_folders()
//! }
//!
//! pre_hook "fmt" {
//!   command   = "terraform"
//!   arguments = ["fmt"]
//! }
//! ```
//!
//! The include chain is modelled by [include::Include], a linked list from the document being evaluated back to the
//! primary document. Helper functions like `path_relative_to_include()` look at it, so a document always gets
//! evaluated at a position in the chain.
//!
//! ### Loading a document
//!
//! see [loader::Loader::load]
//!
//! - the text is run through the [interpolation::Evaluator]: `${...}` spans are substituted first (typed values for
//!   spans forming a whole quoted value, strings everywhere else)
//! - the result is parsed as HCL, or as JSON/YAML when that fails
//! - helper function calls written as bare HCL (`path = find_in_parent_folders()`) are replaced with their results,
//!   then the body is evaluated with [hcl::eval] against the variable context
//! - finally [document::ConfigDocument::decode] picks out the known blocks and attributes
//!
//! Loaded documents are kept in a [loader::DocumentCache], a document is parsed at most once per include position.
//! Every resolution gets its own cache unless one is shared with [resolver::Resolver::with_cache].
//!
//! ### Merging
//!
//! A child document wins over its parents. Scalars are inherited when the child leaves them unset and `inputs` are
//! deep merged. Named blocks (hooks, extra commands, import rules, ...) are "extension items" and are merged by name,
//! see [extensions::merge]:
//!
//! | **parent**       | **child** | **merged (prepend, e.g. pre hooks)** | **merged (append, e.g. post hooks)** |
//! |------------------|-----------|--------------------------------------|--------------------------------------|
//! | `a`, `b`         | `c`       | `a`, `b`, `c`                        | `c`, `a`, `b`                        |
//! | `a`, `b`         | `b'`, `c` | `a`, `b'`, `c`                       | `c`, `a`, `b'`                       |
//!
//! ### Variables
//!
//! Variables live in a [variables::VariableContext]. Every entry remembers its [variables::VariableSource] and a
//! lower ranked source never replaces a higher ranked one. Explicit `-var` input ranks highest.
//!
//! ### Resolution
//!
//! [resolver::Resolver::resolve] drives all of the above and returns a [config::TerragruntConfig]. Nothing gets
//! executed: hooks and extra commands become [dispatch::CommandDescriptor]s, import rules become
//! [dispatch::FileImport]s, and whether the unit runs at all is answered by [resolver::Resolver::should_run].
//!
pub mod collaborators;
pub mod conditions;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod extensions;
pub mod functions;
pub mod include;
pub mod interpolation;
pub mod loader;
pub mod options;
pub mod resolver;
mod util;
pub mod value;
pub mod variables;
mod visit;

pub use config::TerragruntConfig;
pub use error::ConfigError;
pub use options::ResolveOptions;
pub use resolver::Resolver;
