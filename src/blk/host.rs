//! 宿主环境接口层
//!
//! 块设备核心只消费这些接口, 并不实现它们:
//! 主设备号的申请与释放, 请求队列的建立与清理, 磁盘描述符的发布与撤销,
//! 以及提供待处理请求的队列.
//! 具体的宿主 (内核块层, 或者测试里的内存模拟) 由使用者提供.

use super::{BlkResult, Request};

/// 主设备号
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MajorId(pub u32);

/// 宿主侧请求队列的句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub u32);

/// 已发布磁盘的句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskId(pub u32);

/// 发布给宿主的磁盘描述符 (gendisk).
///
/// 不包含容量: 发布时容量为 0, 发布成功后再通过 [`BlockHost::set_capacity`] 设置.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskDescriptor {
    pub name: String,
    pub major: MajorId,
    pub first_minor: u32,
    pub minors: u32,
    pub logical_block_size: usize,
}

/// 设备生命周期用到的宿主服务.
///
/// 宿主保证这些调用不会被重入, 也不会和请求处理并发执行.
pub trait BlockHost {
    /// 动态申请一个主设备号
    fn reserve_major(&mut self, name: &str) -> BlkResult<MajorId>;

    fn release_major(&mut self, major: MajorId, name: &str);

    /// 建立请求队列, 记录逻辑块大小
    fn init_queue(&mut self, logical_block_size: usize) -> BlkResult<QueueId>;

    fn cleanup_queue(&mut self, queue: QueueId);

    /// 让磁盘对系统可见, 此时容量为 0
    fn publish(&mut self, disk: DiskDescriptor) -> BlkResult<DiskId>;

    /// 设置磁盘容量, 单位是 512 字节的内核扇区
    fn set_capacity(&mut self, disk: DiskId, sectors: u64);

    fn unpublish(&mut self, disk: DiskId);
}

/// 宿主的 I/O 子系统提供的待处理请求队列
pub trait RequestSource {
    /// 取出下一个待处理请求, 队列为空时返回 None
    fn next_pending_request(&mut self) -> Option<Request>;

    /// 完成一个请求并把它交还给宿主
    fn complete(&mut self, request: Request, status: BlkResult<()>);
}
