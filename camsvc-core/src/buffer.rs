use std::fmt;

/// 输出流的 Buffer 目标 (Surface 的生产端)
///
/// 由外部协作方创建并持有，Core 只引用它并原样交给驱动。
pub trait BufferProducer: fmt::Debug + Send + Sync {
    /// 进程内唯一标识，便于日志与比较
    fn id(&self) -> u64;

    /// Surface 的默认尺寸 (元数据流没有显式宽高时使用)
    fn default_size(&self) -> (u32, u32);
}
