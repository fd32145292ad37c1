//! 块设备层的错误类型
//!
//! 生命周期阶段的失败会触发回滚并返回给 `create_device` 的调用者;
//! 单个请求的失败只通过该请求自身的完成状态报告, 不会影响队列中的其他请求.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlkError {
    /// 后备存储或队列分配失败
    OutOfMemory,
    /// 请求访问的字节范围超出设备容量
    OutOfRange,
    /// 主设备号申请被宿主拒绝
    RegistrationFailed,
    /// 请求队列初始化失败
    QueueInitFailed,
    /// 磁盘描述符发布失败
    PublishFailed,
    /// 出队的请求不是数据读写请求
    UnsupportedRequest,
    /// 设备参数不合法 (扇区大小为 0, 容量不能被扇区大小整除, 名字过长...)
    InvalidConfig,
    /// 请求段的缓冲区比它声明的扇区数要小
    ShortBuffer,
    /// 队列所属的设备已经被销毁
    NoDevice,
    /// 无法识别的控制命令
    UnknownCommand,
}

pub type BlkResult<T> = Result<T, BlkError>;

impl BlkError {
    /// 对应的内核风格错误码 (负的 errno)
    pub fn errno(self) -> i32 {
        match self {
            // ENOMEM
            BlkError::OutOfMemory | BlkError::QueueInitFailed | BlkError::PublishFailed => -12,
            // ENOSPC
            BlkError::OutOfRange => -28,
            // EBUSY
            BlkError::RegistrationFailed => -16,
            // EIO
            BlkError::UnsupportedRequest => -5,
            // EINVAL
            BlkError::InvalidConfig | BlkError::ShortBuffer => -22,
            // ENXIO
            BlkError::NoDevice => -6,
            // ENOTTY
            BlkError::UnknownCommand => -25,
        }
    }
}

impl fmt::Display for BlkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BlkError::OutOfMemory => "out of memory",
            BlkError::OutOfRange => "access beyond end of device",
            BlkError::RegistrationFailed => "failed to register block device major",
            BlkError::QueueInitFailed => "failed to initialize request queue",
            BlkError::PublishFailed => "failed to publish disk",
            BlkError::UnsupportedRequest => "not a data request",
            BlkError::InvalidConfig => "invalid device configuration",
            BlkError::ShortBuffer => "request buffer shorter than its sectors",
            BlkError::NoDevice => "device has been removed",
            BlkError::UnknownCommand => "unknown control command",
        };
        write!(f, "{} ({})", msg, self.errno())
    }
}

impl std::error::Error for BlkError {}
