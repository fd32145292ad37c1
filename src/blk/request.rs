//! 请求与请求队列处理
//!
//! 宿主把待处理的 I/O 请求放在它自己的队列里 ([`RequestSource`]),
//! [`BlkQueue::process`] 在设备锁的保护下一个一个地取出请求, 交给传输引擎, 再报告完成状态,
//! 直到宿主的队列为空.

use std::sync::{Arc, Weak};

use log::{debug, warn};
use spin::Mutex;

use super::transfer::{self, Direction};
use super::{BackingStore, BlkError, BlkResult, RequestSource};

/// 请求类型, 只有文件系统类型的请求带有数据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// 普通的读写请求
    Fs,
    /// 控制/屏障之类不带数据的请求
    Control,
}

/// 请求中的一段连续数据
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// 这一段覆盖的扇区数
    pub sectors: usize,
    /// 调用方的缓冲区, 长度至少为 sectors * sector_size
    pub buffer: Vec<u8>,
}

impl Segment {
    pub fn new(sectors: usize, buffer: Vec<u8>) -> Self {
        Self { sectors, buffer }
    }
}

/// 一个待处理的 I/O 请求.
///
/// 由宿主创建, 恰好被处理一次, 完成后连同缓冲区一起还给宿主.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    kind: RequestKind,
    direction: Direction,
    /// 起始扇区
    sector: usize,
    segments: Vec<Segment>,
}

impl Request {
    /// 读 sectors 个扇区, 缓冲区按 sector_size 预先分配.
    ///
    /// 字节数溢出 usize 时不分配缓冲区, 这样的请求一定越界, 处理时以 OutOfRange 完成.
    pub fn read(sector: usize, sectors: usize, sector_size: usize) -> Self {
        let len = sectors.checked_mul(sector_size).unwrap_or(0);
        Self::with_segments(
            Direction::Read,
            sector,
            vec![Segment::new(sectors, vec![0u8; len])],
        )
    }

    /// 把 data 写到 sector 开始的 sectors 个扇区
    pub fn write(sector: usize, sectors: usize, data: Vec<u8>) -> Self {
        Self::with_segments(Direction::Write, sector, vec![Segment::new(sectors, data)])
    }

    /// 由若干段组成的请求, 各段依次落在连续的扇区上
    pub fn with_segments(direction: Direction, sector: usize, segments: Vec<Segment>) -> Self {
        Self {
            kind: RequestKind::Fs,
            direction,
            sector,
            segments,
        }
    }

    /// 不带数据的控制请求
    pub fn control() -> Self {
        Self {
            kind: RequestKind::Control,
            direction: Direction::Read,
            sector: 0,
            segments: Vec::new(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sector(&self) -> usize {
        self.sector
    }

    /// 请求覆盖的总扇区数, 溢出时返回 None
    pub fn sector_count(&self) -> Option<usize> {
        self.segments
            .iter()
            .try_fold(0usize, |acc, seg| acc.checked_add(seg.sectors))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// 把所有段的缓冲区拼接起来
    pub fn data(&self) -> Vec<u8> {
        self.segments
            .iter()
            .flat_map(|seg| seg.buffer.iter().copied())
            .collect()
    }
}

/// 设备的请求队列.
///
/// 它只持有后备存储 (以及保护它的锁) 的弱引用, 所有权属于设备句柄.
pub struct BlkQueue {
    store: Weak<Mutex<BackingStore>>,
    logical_block_size: usize,
}

impl BlkQueue {
    pub(super) fn new(store: &Arc<Mutex<BackingStore>>) -> Self {
        let logical_block_size = store.lock().sector_size();
        Self {
            store: Arc::downgrade(store),
            logical_block_size,
        }
    }

    pub fn logical_block_size(&self) -> usize {
        self.logical_block_size
    }

    /// 处理宿主队列中的全部请求, 返回完成的请求数.
    ///
    /// 每个请求的取出, 传输和完成都在设备锁内进行, 同一时刻只有一个请求在访问存储.
    /// 循环直到宿主报告队列为空, 不假定一次调用处理的请求数量.
    pub fn process<Q: RequestSource + ?Sized>(&self, source: &mut Q) -> usize {
        let mut done = 0;
        loop {
            let store = self.store.upgrade();
            let mut guard = store.as_ref().map(|store| store.lock());
            let mut rq = match source.next_pending_request() {
                Some(rq) => rq,
                None => break,
            };
            let status = match guard.as_deref_mut() {
                Some(store) => Self::handle(store, &mut rq),
                None => Err(BlkError::NoDevice),
            };
            source.complete(rq, status);
            done += 1;
        }
        debug!("request queue drained, {} request(s) completed", done);
        done
    }

    fn handle(store: &mut BackingStore, rq: &mut Request) -> BlkResult<()> {
        if rq.kind != RequestKind::Fs {
            warn!("Skip non-fs request");
            return Err(BlkError::UnsupportedRequest);
        }
        // 先检查整个请求的范围和每一段的缓冲区, 保证失败的请求不会只写进去一部分
        let total = rq.sector_count().ok_or(BlkError::OutOfRange)?;
        transfer::check(store, rq.sector, total)?;
        let mut sector = rq.sector;
        for seg in rq.segments.iter() {
            transfer::check_segment(store, sector, seg.sectors, seg.buffer.len())?;
            sector += seg.sectors;
        }

        let direction = rq.direction;
        let mut sector = rq.sector;
        for seg in rq.segments.iter_mut() {
            transfer::transfer(store, sector, seg.sectors, &mut seg.buffer, direction)?;
            sector += seg.sectors;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VecQueue;

    fn fifo(requests: Vec<Request>) -> VecQueue {
        let mut queue = VecQueue::new();
        for rq in requests {
            queue.submit(rq);
        }
        queue
    }

    #[test]
    fn control_request_fails_and_loop_continues() {
        let store = Arc::new(Mutex::new(BackingStore::create(2048, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        let mut src = fifo(vec![Request::control(), Request::read(0, 1, 512)]);

        assert_eq!(queue.process(&mut src), 2);
        assert_eq!(src.completed()[0].1, Err(BlkError::UnsupportedRequest));
        assert_eq!(src.completed()[1].1, Ok(()));
    }

    #[test]
    fn segments_land_on_consecutive_sectors() {
        let store = Arc::new(Mutex::new(BackingStore::create(4 * 512, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        let write = Request::with_segments(
            Direction::Write,
            1,
            vec![Segment::new(1, vec![1u8; 512]), Segment::new(2, vec![2u8; 1024])],
        );
        let mut src = fifo(vec![write, Request::read(0, 4, 512)]);
        queue.process(&mut src);

        let data = src.completed()[1].0.data();
        assert!(data[..512].iter().all(|b| *b == 0));
        assert!(data[512..1024].iter().all(|b| *b == 1));
        assert!(data[1024..].iter().all(|b| *b == 2));
    }

    #[test]
    fn partially_out_of_range_request_writes_nothing() {
        let store = Arc::new(Mutex::new(BackingStore::create(4 * 512, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        let write = Request::with_segments(
            Direction::Write,
            2,
            vec![Segment::new(1, vec![7u8; 512]), Segment::new(2, vec![7u8; 1024])],
        );
        let mut src = fifo(vec![write, Request::read(0, 4, 512)]);
        queue.process(&mut src);

        assert_eq!(src.completed()[0].1, Err(BlkError::OutOfRange));
        assert!(src.completed()[1].0.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn short_later_segment_writes_nothing() {
        let store = Arc::new(Mutex::new(BackingStore::create(4 * 512, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        let write = Request::with_segments(
            Direction::Write,
            0,
            vec![Segment::new(1, vec![0x77u8; 512]), Segment::new(1, vec![0x77u8; 100])],
        );
        assert_eq!(write.kind(), RequestKind::Fs);
        let mut src = fifo(vec![write, Request::read(0, 2, 512)]);
        queue.process(&mut src);

        assert_eq!(src.completed()[0].1, Err(BlkError::ShortBuffer));
        assert!(src.completed()[1].0.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn overflowing_read_completes_out_of_range() {
        let store = Arc::new(Mutex::new(BackingStore::create(4 * 512, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        let read = Request::read(0, usize::MAX, 512);
        assert!(read.segments()[0].buffer.is_empty());

        let mut src = fifo(vec![read]);
        queue.process(&mut src);
        assert_eq!(src.completed()[0].1, Err(BlkError::OutOfRange));
    }

    #[test]
    fn control_request_kind() {
        assert_eq!(Request::control().kind(), RequestKind::Control);
    }

    #[test]
    fn dead_store_completes_with_no_device() {
        let store = Arc::new(Mutex::new(BackingStore::create(512, 512).unwrap()));
        let queue = BlkQueue::new(&store);
        drop(store);

        let mut src = fifo(vec![Request::read(0, 1, 512)]);
        assert_eq!(queue.process(&mut src), 1);
        assert_eq!(src.completed()[0].1, Err(BlkError::NoDevice));
    }
}
