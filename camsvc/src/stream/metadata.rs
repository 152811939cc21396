/// 元数据流 (人脸等分析结果)
///
/// 只参与链接与描述，没有专有操作；结果由驱动直接写入 Surface。
pub(super) struct MetadataStream;
