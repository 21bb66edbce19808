//! 加载器配置与模块伴随配置。
//!
//! # 契约说明（What）
//! - [`LoaderConfig`]：宿主侧行为开关，可从 TOML 字符串或文件读取，所有字段均有默认值，未知键直接拒绝；
//! - [`PluginSettings`]：与模块同目录、同主名的伴随文件（默认 `<stem>.toml`）中的 `[udf]` 段，
//!   描述该模块是否启用以及其客户端应连接的端点。文件缺失等价于全部默认值。
//!
//! ```toml
//! [udf]
//! enabled = true
//! endpoint = "dns:///localhost:50051"
//! secure = false
//! transport = "stream"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{channel::ChannelCredentials, error::ConfigError};

/// 伴随配置文件的默认扩展名。
pub const DEFAULT_SETTINGS_EXTENSION: &str = "toml";

/// 未配置端点时使用的默认地址。
pub const DEFAULT_ENDPOINT: &str = "dns:///localhost:50051";

/// 加载器配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// 为 `true` 时缺少客户端工厂入口的模块视为加载失败，而非仅 Schema。
    pub require_client_factory: bool,
    /// 伴随配置文件扩展名。
    pub settings_extension: String,
    /// 伴随配置未给出 `service` 时传给客户端工厂入口的服务名提示。
    pub default_service_hint: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            require_client_factory: false,
            settings_extension: DEFAULT_SETTINGS_EXTENSION.to_string(),
            default_service_hint: None,
        }
    }
}

impl LoaderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// 模块对应的伴随配置文件路径。
    pub fn settings_path(&self, module: &Path) -> PathBuf {
        module.with_extension(&self.settings_extension)
    }
}

/// 模块伴随配置的 `[udf]` 段。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginSettings {
    /// 为 `false` 时加载器跳过该模块，不会打开动态库。
    pub enabled: bool,
    /// 客户端通道的目标地址。
    pub endpoint: String,
    /// 是否使用 TLS 凭据。
    pub secure: bool,
    /// 传输实现名称，由通道工厂解释。
    pub transport: String,
    /// 传给客户端工厂入口的服务名提示。
    pub service: Option<String>,
    /// TLS 校验使用的主机名覆盖。
    pub tls_server_name: Option<String>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secure: false,
            transport: "stream".to_string(),
            service: None,
            tls_server_name: None,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    udf: PluginSettings,
}

impl PluginSettings {
    /// 解析伴随配置文本；`origin` 只用于错误消息。
    pub fn from_toml_str(source: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str::<SettingsFile>(source)
            .map(|file| file.udf)
            .map_err(|source| ConfigError::Parse {
                origin: origin.to_string(),
                source,
            })
    }

    /// 读取 `path`；文件不存在时返回 `Ok(None)`。
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = read(path)?;
        Self::from_toml_str(&text, &path.display().to_string()).map(Some)
    }

    /// 按 `secure` 选择通道凭据。
    pub fn credentials(&self) -> ChannelCredentials {
        if self.secure {
            ChannelCredentials::Tls {
                server_name: self.tls_server_name.clone(),
            }
        } else {
            ChannelCredentials::Insecure
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
