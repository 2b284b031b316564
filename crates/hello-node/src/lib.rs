//! Reference capability node.
//!
//! Registers one deterministic skill and two generative reasoners that
//! form a small call graph:
//!
//! ```text
//! say_hello (reasoner)
//! ├─→ get_greeting (skill)
//! └─→ add_emoji    (reasoner)
//! ```
//!
//! plus `demo_hello`, the same flow exposed under the `demo` namespace.

pub mod capabilities;
pub mod cli;
