//! 错误码约定。
//!
//! 各 crate 的错误枚举各自用 `thiserror` 派生，但都通过 [`ErrorCode`] 暴露一个
//! 稳定的 `<领域>.<语义>` 字符串，日志与指标只依赖该字符串聚合。

/// 为错误类型提供稳定错误码。
pub trait ErrorCode {
    /// 返回 [`codes`] 中定义的某个常量。
    fn code(&self) -> &'static str;
}

/// 稳定错误码集合。
///
/// # 契约说明（What）
/// - 码值一经发布不得修改含义；新增语义只能追加新常量；
/// - `buffer.*` 由 `rivulet-buffer` 使用，`sequence.*` 由 `rivulet-sequencing` 使用。
pub mod codes {
    /// 池内暂无空闲缓冲（限时租借超时）。
    pub const BUFFER_POOL_EXHAUSTED: &str = "buffer.pool_exhausted";
    /// 池已关闭。
    pub const BUFFER_POOL_CLOSED: &str = "buffer.pool_closed";
    /// 请求的尺寸非法或内存分配失败。
    pub const BUFFER_INVALID_SIZE: &str = "buffer.invalid_size";
    /// 缓冲池配置非法。
    pub const BUFFER_INVALID_CONFIG: &str = "buffer.invalid_config";
    /// 同一序列第二次标记终止分片。
    pub const SEQUENCE_DUPLICATE_LAST_CHUNK: &str = "sequence.duplicate_last_chunk";
    /// 出现编号超过终止分片的分片。
    pub const SEQUENCE_CHUNK_BEYOND_TERMINAL: &str = "sequence.chunk_beyond_terminal";
}
