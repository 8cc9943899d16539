//! Geo 数据集：CIDR/域名列表的解析、缓存与定期刷新

mod cidr;
mod updater;

pub use cidr::*;
pub use updater::*;
