//! 内存块设备: 用一段内存模拟按扇区寻址的磁盘, 处理宿主队列中的读写请求,
//! 并负责设备从注册到销毁的整个生命周期.
//!
//! [`blk`] 是设备本身, [`device`] 是一个用内存模拟的宿主环境, CLI 和测试都用它.

pub mod blk;
pub mod device;
pub mod logging;
