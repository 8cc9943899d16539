//! 路由策略：决策结构与 PAC 渲染

mod pac;
mod policy;

pub use pac::*;
pub use policy::*;
