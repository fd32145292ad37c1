//! 用内存模拟的宿主环境.
//!
//! 真正的驱动运行在内核块层之上, 这里用 [`MemHost`] 扮演内核的角色:
//! 分配主设备号, 登记队列和已发布的磁盘, 并把每次调用记到日志里方便检查顺序.
//! [`VecQueue`] 扮演宿主的请求队列.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::debug;

use crate::blk::{
    BlkError, BlkResult, BlockHost, DiskDescriptor, DiskId, MajorId, QueueId, Request,
    RequestSource,
};

/// 动态分配主设备号时的搜索范围, 从高往低找第一个空闲的
const MAX_DYNAMIC_MAJOR: u32 = 254;

/// 可以注入失败的宿主调用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    Major,
    Queue,
    Publish,
}

/// 成功的宿主调用记录
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    ReserveMajor(u32),
    ReleaseMajor(u32),
    InitQueue(u32),
    CleanupQueue(u32),
    Publish(u32),
    SetCapacity(u32, u64),
    Unpublish(u32),
}

/// 已发布的磁盘
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedDisk {
    pub descriptor: DiskDescriptor,
    /// 发布那一刻的容量 (内核扇区)
    pub capacity_at_publish: u64,
    /// 当前容量 (内核扇区)
    pub capacity: u64,
}

#[derive(Default)]
pub struct MemHost {
    majors: BTreeMap<u32, String>,
    queues: BTreeSet<u32>,
    disks: BTreeMap<u32, PublishedDisk>,
    next_queue: u32,
    next_disk: u32,
    fail: Option<FailPoint>,
    journal: Vec<HostEvent>,
}

impl MemHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让下一次对应的宿主调用失败, 只生效一次
    pub fn fail_next(&mut self, point: FailPoint) {
        self.fail = Some(point);
    }

    fn should_fail(&mut self, point: FailPoint) -> bool {
        if self.fail == Some(point) {
            self.fail = None;
            return true;
        }
        false
    }

    pub fn journal(&self) -> &[HostEvent] {
        &self.journal
    }

    pub fn disk(&self, disk: DiskId) -> Option<&PublishedDisk> {
        self.disks.get(&disk.0)
    }

    pub fn major_owner(&self, major: MajorId) -> Option<&str> {
        self.majors.get(&major.0).map(String::as_str)
    }

    /// 没有任何残留的主设备号, 队列或磁盘
    pub fn is_idle(&self) -> bool {
        self.majors.is_empty() && self.queues.is_empty() && self.disks.is_empty()
    }
}

impl BlockHost for MemHost {
    fn reserve_major(&mut self, name: &str) -> BlkResult<MajorId> {
        if self.should_fail(FailPoint::Major) {
            return Err(BlkError::RegistrationFailed);
        }
        let major = (1..=MAX_DYNAMIC_MAJOR)
            .rev()
            .find(|major| !self.majors.contains_key(major))
            .ok_or(BlkError::RegistrationFailed)?;
        debug!("host: major {} -> {}", major, name);
        self.majors.insert(major, String::from(name));
        self.journal.push(HostEvent::ReserveMajor(major));
        Ok(MajorId(major))
    }

    fn release_major(&mut self, major: MajorId, name: &str) {
        // 名字对不上时内核只会警告, 这里也一样照常释放
        if self.majors.remove(&major.0).as_deref() != Some(name) {
            debug!("host: major {} released under another name {}", major.0, name);
        }
        self.journal.push(HostEvent::ReleaseMajor(major.0));
    }

    fn init_queue(&mut self, logical_block_size: usize) -> BlkResult<QueueId> {
        if self.should_fail(FailPoint::Queue) {
            return Err(BlkError::OutOfMemory);
        }
        let id = self.next_queue;
        self.next_queue += 1;
        debug!("host: queue {} (logical block size {})", id, logical_block_size);
        self.queues.insert(id);
        self.journal.push(HostEvent::InitQueue(id));
        Ok(QueueId(id))
    }

    fn cleanup_queue(&mut self, queue: QueueId) {
        self.queues.remove(&queue.0);
        self.journal.push(HostEvent::CleanupQueue(queue.0));
    }

    fn publish(&mut self, descriptor: DiskDescriptor) -> BlkResult<DiskId> {
        if self.should_fail(FailPoint::Publish) {
            return Err(BlkError::OutOfMemory);
        }
        let id = self.next_disk;
        self.next_disk += 1;
        self.disks.insert(
            id,
            PublishedDisk {
                descriptor,
                capacity_at_publish: 0,
                capacity: 0,
            },
        );
        self.journal.push(HostEvent::Publish(id));
        Ok(DiskId(id))
    }

    fn set_capacity(&mut self, disk: DiskId, sectors: u64) {
        if let Some(published) = self.disks.get_mut(&disk.0) {
            published.capacity = sectors;
        }
        self.journal.push(HostEvent::SetCapacity(disk.0, sectors));
    }

    fn unpublish(&mut self, disk: DiskId) {
        self.disks.remove(&disk.0);
        self.journal.push(HostEvent::Unpublish(disk.0));
    }
}

/// 宿主的请求队列: 先进先出, 完成的请求按完成顺序保存
#[derive(Default)]
pub struct VecQueue {
    pending: VecDeque<Request>,
    completed: Vec<(Request, BlkResult<()>)>,
}

impl VecQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, request: Request) {
        self.pending.push_back(request);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn completed(&self) -> &[(Request, BlkResult<()>)] {
        &self.completed
    }

    pub fn take_completed(&mut self) -> Vec<(Request, BlkResult<()>)> {
        std::mem::take(&mut self.completed)
    }
}

impl RequestSource for VecQueue {
    fn next_pending_request(&mut self) -> Option<Request> {
        self.pending.pop_front()
    }

    fn complete(&mut self, request: Request, status: BlkResult<()>) {
        self.completed.push((request, status));
    }
}
