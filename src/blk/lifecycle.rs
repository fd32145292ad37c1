//! 设备生命周期管理
//!
//! 设备的建立分成四个阶段, 依次申请:
//! 主设备号 -> 后备存储 -> 请求队列 -> 磁盘描述符 (gendisk).
//!
//! 每个阶段成功后, 把得到的资源压入 [`Rollback`] 栈.
//! 任何一个阶段失败, `Rollback` 被 drop 时会按相反的顺序释放已经拿到的资源,
//! 所以调用者要么得到一个完整的 [`DeviceHandle`], 要么什么都没有.
//! 销毁设备时用同一个释放函数, 按同样的逆序无条件地释放全部资源.

use std::sync::Arc;

use log::{debug, error, info};
use spin::Mutex;

use super::{
    geometry, BackingStore, BlkError, BlkQueue, BlkResult, BlockHost, DeviceConfig,
    DiskDescriptor, DiskId, HdGeometry, MajorId, QueueId, RequestSource, HDIO_GETGEO,
    KERNEL_SECTOR_SIZE,
};

/// 一个已经申请到的资源
enum Acquired {
    Major(MajorId),
    Store(Arc<Mutex<BackingStore>>),
    Queue(QueueId),
    Disk(DiskId),
}

/// 从栈顶开始逐个释放资源, 顺序与申请顺序相反
fn release_all<H: BlockHost + ?Sized>(host: &mut H, name: &str, acquired: &mut Vec<Acquired>) {
    while let Some(resource) = acquired.pop() {
        match resource {
            Acquired::Disk(disk) => {
                debug!("Delete gendisk");
                host.unpublish(disk);
            }
            Acquired::Queue(queue) => {
                debug!("Cleanup queue");
                host.cleanup_queue(queue);
            }
            Acquired::Store(store) => {
                debug!("Free vdisk");
                drop(store);
            }
            Acquired::Major(major) => {
                debug!("Unregister blkdev");
                host.release_major(major, name);
            }
        }
    }
}

/// 建立设备过程中的撤销栈, 没有 commit 就被 drop 时回滚全部已申请的资源
struct Rollback<'h, H: BlockHost + ?Sized> {
    host: &'h mut H,
    name: String,
    acquired: Vec<Acquired>,
}

impl<'h, H: BlockHost + ?Sized> Rollback<'h, H> {
    fn new(host: &'h mut H, name: &str) -> Self {
        Self {
            host,
            name: String::from(name),
            acquired: Vec::new(),
        }
    }

    fn host(&mut self) -> &mut H {
        &mut *self.host
    }

    fn push(&mut self, resource: Acquired) {
        self.acquired.push(resource);
    }

    /// 所有阶段都成功了, 资源的所有权转交给设备句柄
    fn commit(mut self) {
        self.acquired.clear();
    }
}

impl<H: BlockHost + ?Sized> Drop for Rollback<'_, H> {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            debug!("Rolling back {} stage(s)", self.acquired.len());
        }
        release_all(&mut *self.host, &self.name, &mut self.acquired);
    }
}

/// 一个完整建立起来的内存块设备.
///
/// 独占后备存储和请求队列; 只能通过 [`destroy_device`] 归还宿主资源.
#[must_use = "the device must be released with destroy_device"]
pub struct DeviceHandle {
    name: String,
    major: MajorId,
    store: Arc<Mutex<BackingStore>>,
    queue_id: QueueId,
    queue: BlkQueue,
    disk: DiskId,
}

impl DeviceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major(&self) -> MajorId {
        self.major
    }

    pub fn disk(&self) -> DiskId {
        self.disk
    }

    pub fn capacity_bytes(&self) -> usize {
        self.store.lock().capacity_bytes()
    }

    pub fn sector_size(&self) -> usize {
        self.queue.logical_block_size()
    }

    pub fn geometry(&self) -> HdGeometry {
        geometry(&self.store.lock())
    }

    /// 控制命令, 目前只支持 HDIO_GETGEO
    pub fn ioctl(&self, cmd: u32) -> BlkResult<HdGeometry> {
        match cmd {
            // 没有几何信息就没法分区, 所以编一个出来
            HDIO_GETGEO => {
                debug!("retrieving disk geo");
                Ok(self.geometry())
            }
            _ => {
                debug!("unknown command {:#x}", cmd);
                Err(BlkError::UnknownCommand)
            }
        }
    }

    /// 请求处理回调, 由宿主在有请求待处理时调用
    pub fn process_requests<Q: RequestSource + ?Sized>(&self, source: &mut Q) -> usize {
        self.queue.process(source)
    }
}

/// 用 `capacity_bytes / sector_size` 个扇区建立默认名字的设备
pub fn create_device<H: BlockHost + ?Sized>(
    host: &mut H,
    capacity_bytes: usize,
    sector_size: usize,
) -> BlkResult<DeviceHandle> {
    let config = DeviceConfig::with_capacity(capacity_bytes, sector_size)?;
    create_device_with(host, &config)
}

/// 按 config 建立设备, 任何阶段失败都会回滚之前的阶段
pub fn create_device_with<H: BlockHost + ?Sized>(
    host: &mut H,
    config: &DeviceConfig,
) -> BlkResult<DeviceHandle> {
    config.validate()?;
    let capacity = config.capacity_bytes()?;
    info!("Start device initialization");

    let mut stages = Rollback::new(host, &config.name);

    debug!("Register blkdev");
    let major = stages.host().reserve_major(&config.name).map_err(|err| {
        error!("Failed to register blkdev: {}", err);
        BlkError::RegistrationFailed
    })?;
    stages.push(Acquired::Major(major));

    debug!("Allocate memory for vdisk");
    let store = BackingStore::create(capacity, config.sector_size).map_err(|err| {
        error!("Failed to allocate memory for vdisk: {}", err);
        err
    })?;
    let store = Arc::new(Mutex::new(store));
    stages.push(Acquired::Store(Arc::clone(&store)));

    debug!("Initialize queue");
    let queue = BlkQueue::new(&store);
    let queue_id = stages
        .host()
        .init_queue(queue.logical_block_size())
        .map_err(|err| {
            error!("Failed to initialize requests queue: {}", err);
            BlkError::QueueInitFailed
        })?;
    stages.push(Acquired::Queue(queue_id));

    debug!("Create gendisk");
    let descriptor = DiskDescriptor {
        name: config.name.clone(),
        major,
        first_minor: 0,
        minors: config.minors,
        logical_block_size: queue.logical_block_size(),
    };
    let disk = stages.host().publish(descriptor).map_err(|err| {
        error!("Failed to create gendisk: {}", err);
        BlkError::PublishFailed
    })?;
    stages.push(Acquired::Disk(disk));
    // 以 0 容量发布, 磁盘可见之后才设置真实容量
    stages
        .host()
        .set_capacity(disk, (capacity / KERNEL_SECTOR_SIZE) as u64);

    stages.commit();
    info!("Device successfully initialized");
    Ok(DeviceHandle {
        name: config.name.clone(),
        major,
        store,
        queue_id,
        queue,
        disk,
    })
}

/// 撤销磁盘, 清理队列, 释放存储, 最后归还主设备号
pub fn destroy_device<H: BlockHost + ?Sized>(host: &mut H, handle: DeviceHandle) {
    let DeviceHandle {
        name,
        major,
        store,
        queue_id,
        queue,
        disk,
    } = handle;
    // 队列只有存储的弱引用, 先丢掉它不影响释放顺序
    drop(queue);
    let mut acquired = vec![
        Acquired::Major(major),
        Acquired::Store(store),
        Acquired::Queue(queue_id),
        Acquired::Disk(disk),
    ];
    release_all(host, &name, &mut acquired);
    info!("Device was removed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FailPoint, HostEvent, MemHost};

    #[test]
    fn invalid_config_acquires_nothing() {
        let mut host = MemHost::new();
        assert_eq!(
            create_device(&mut host, 1000, 512).err(),
            Some(BlkError::InvalidConfig)
        );
        assert!(host.journal().is_empty());
    }

    #[test]
    fn major_failure_stops_immediately() {
        let mut host = MemHost::new();
        host.fail_next(FailPoint::Major);
        assert_eq!(
            create_device(&mut host, 5120, 512).err(),
            Some(BlkError::RegistrationFailed)
        );
        assert!(host.is_idle());
        assert!(host.journal().is_empty());
    }

    #[test]
    fn store_failure_releases_major() {
        let mut host = MemHost::new();
        let config = DeviceConfig {
            sector_size: 1,
            sectors: usize::MAX,
            ..DeviceConfig::default()
        };
        assert_eq!(
            create_device_with(&mut host, &config).err(),
            Some(BlkError::OutOfMemory)
        );
        assert_eq!(
            host.journal(),
            &[HostEvent::ReserveMajor(254), HostEvent::ReleaseMajor(254)]
        );
        assert!(host.is_idle());
    }

    #[test]
    fn queue_failure_unwinds_in_reverse() {
        let mut host = MemHost::new();
        host.fail_next(FailPoint::Queue);
        assert_eq!(
            create_device(&mut host, 5120, 512).err(),
            Some(BlkError::QueueInitFailed)
        );
        assert_eq!(
            host.journal(),
            &[HostEvent::ReserveMajor(254), HostEvent::ReleaseMajor(254)]
        );
        assert!(host.is_idle());
    }

    #[test]
    fn publish_failure_unwinds_in_reverse() {
        let mut host = MemHost::new();
        host.fail_next(FailPoint::Publish);
        assert_eq!(
            create_device(&mut host, 5120, 512).err(),
            Some(BlkError::PublishFailed)
        );
        assert_eq!(
            host.journal(),
            &[
                HostEvent::ReserveMajor(254),
                HostEvent::InitQueue(0),
                HostEvent::CleanupQueue(0),
                HostEvent::ReleaseMajor(254),
            ]
        );
        assert!(host.is_idle());
    }

    #[test]
    fn destroy_releases_in_reverse_order() {
        let mut host = MemHost::new();
        let dev = create_device(&mut host, 5120, 512).unwrap();
        let disk = dev.disk();
        destroy_device(&mut host, dev);

        assert_eq!(
            host.journal(),
            &[
                HostEvent::ReserveMajor(254),
                HostEvent::InitQueue(0),
                HostEvent::Publish(disk.0),
                HostEvent::SetCapacity(disk.0, 10),
                HostEvent::Unpublish(disk.0),
                HostEvent::CleanupQueue(0),
                HostEvent::ReleaseMajor(254),
            ]
        );
        assert!(host.is_idle());
    }

    #[test]
    fn ioctl_answers_only_getgeo() {
        let mut host = MemHost::new();
        let dev = create_device(&mut host, 64 * 512 * 3, 512).unwrap();
        let geo = dev.ioctl(HDIO_GETGEO).unwrap();
        assert_eq!(geo.cylinders, 3);
        assert_eq!(dev.ioctl(0x1234), Err(BlkError::UnknownCommand));
        destroy_device(&mut host, dev);
    }
}
