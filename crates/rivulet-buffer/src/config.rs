//! 缓冲池配置。
//!
//! 配置加载器（进程外部）负责读取文件或命令行；本模块只定义池关心的三项参数，
//! 以及从 TOML 片段解析并校验它们的入口。

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 默认的池化缓冲尺寸（字节）。
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
/// 默认的池化缓冲数量。
pub const DEFAULT_NUMBER_OF_BUFFERS: usize = 1024;
/// 默认的内存对齐（字节），与缓存行对齐。
pub const DEFAULT_ALIGNMENT: usize = 64;

/// `BufferPool` 的构造参数。
///
/// # 契约说明（What）
/// - `buffer_size`：每个池化内存段的字节数，必须大于 0；
/// - `number_of_buffers`：池容量，必须大于 0；
/// - `alignment`：段起始地址的对齐，必须是 2 的幂；非池化段沿用同一对齐。
///
/// TOML 中缺省的字段取默认值，未知字段视为错误：
///
/// ```
/// use rivulet_buffer::BufferPoolConfig;
///
/// let config = BufferPoolConfig::from_toml_str("buffer_size = 1024\nnumber_of_buffers = 8")
///     .expect("合法配置");
/// assert_eq!(config.buffer_size, 1024);
/// assert_eq!(config.alignment, 64);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferPoolConfig {
    pub buffer_size: usize,
    pub number_of_buffers: usize,
    pub alignment: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            number_of_buffers: DEFAULT_NUMBER_OF_BUFFERS,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl BufferPoolConfig {
    /// 以默认对齐构造配置。
    pub fn new(buffer_size: usize, number_of_buffers: usize) -> Self {
        Self {
            buffer_size,
            number_of_buffers,
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// 解析 TOML 片段并立即校验。
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 检查参数是否满足构造池的前置条件。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.number_of_buffers == 0 {
            return Err(ConfigError::ZeroBufferCount);
        }
        if !self.alignment.is_power_of_two() {
            return Err(ConfigError::InvalidAlignment(self.alignment));
        }
        Ok(())
    }
}
