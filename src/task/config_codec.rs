// Copyright (C) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Encodes the parts of a [`TaskConfig`] that the `tasks` table's scalar
//! columns don't already carry (headers, form items, file specs, and the
//! remaining option flags) into the `config_blob` column, so a restart can
//! rebuild a config byte-for-byte instead of a bare-bones approximation.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::service::interface::{get_string, get_u32, put_string};
use crate::task::config::{
    ByteRange, CommonTaskConfig, Mode, NetworkConfig, MinSpeed, TaskConfig, TimeoutConfig, Version,
};
use crate::utils::form_item::{FileSpec, FormItem};

/// Serializes the non-column parts of `config` for storage in
/// `tasks.config_blob`.
pub(crate) fn encode(config: &TaskConfig) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_string(&mut buf, &config.method);
    put_string(&mut buf, &config.title);
    put_string(&mut buf, &config.description);

    buf.extend_from_slice(&(config.headers.len() as u32).to_le_bytes());
    for (k, v) in &config.headers {
        put_string(&mut buf, k);
        put_string(&mut buf, v);
    }

    buf.extend_from_slice(&(config.form_items.len() as u32).to_le_bytes());
    for item in &config.form_items {
        put_string(&mut buf, &item.name);
        put_string(&mut buf, &item.value);
    }

    buf.extend_from_slice(&(config.file_specs.len() as u32).to_le_bytes());
    for spec in &config.file_specs {
        put_string(&mut buf, &spec.name);
        put_string(&mut buf, &spec.path);
        put_string(&mut buf, &spec.file_name);
        put_string(&mut buf, &spec.mime_type);
        buf.extend_from_slice(&[spec.is_user_file as u8]);
    }

    let c = &config.common_data;
    buf.extend_from_slice(&(c.mode as u8).to_le_bytes());
    buf.extend_from_slice(&(config.version as u8).to_le_bytes());
    buf.extend_from_slice(&(c.network as u8).to_le_bytes());
    buf.extend_from_slice(&[
        c.overwrite as u8,
        c.metered_allowed as u8,
        c.roaming_allowed as u8,
        c.retry_enabled as u8,
        c.redirect_enabled as u8,
        c.gauge as u8,
        c.precise as u8,
        c.background as u8,
    ]);
    buf.extend_from_slice(&c.range.begins.to_le_bytes());
    buf.extend_from_slice(&c.range.ends.to_le_bytes());
    buf.extend_from_slice(&c.min_speed.speed.to_le_bytes());
    buf.extend_from_slice(&c.min_speed.duration_ms.to_le_bytes());
    buf.extend_from_slice(&c.timeout.connect_timeout_secs.to_le_bytes());
    buf.extend_from_slice(&c.timeout.total_timeout_secs.to_le_bytes());

    buf.to_vec()
}

/// Rebuilds the parts [`encode`] wrote. `bundle`/`url`/`token`/`task_id`/
/// `action`/`priority` come from the `tasks` table's own columns and are
/// folded in by the caller afterwards.
pub(crate) fn decode(blob: &[u8]) -> Result<PartialConfig, ErrorCode> {
    if blob.is_empty() {
        // Pre-migration or legacy rows: nothing to rebuild, caller falls
        // back to defaults.
        return Ok(PartialConfig::default());
    }
    let mut buf = Bytes::copy_from_slice(blob);
    let method = get_string(&mut buf)?;
    let title = get_string(&mut buf)?;
    let description = get_string(&mut buf)?;

    let header_count = get_u32(&mut buf)?;
    let mut headers = std::collections::HashMap::new();
    for _ in 0..header_count {
        let k = get_string(&mut buf)?;
        let v = get_string(&mut buf)?;
        headers.insert(k, v);
    }

    let form_count = get_u32(&mut buf)?;
    let mut form_items = Vec::with_capacity(form_count as usize);
    for _ in 0..form_count {
        let name = get_string(&mut buf)?;
        let value = get_string(&mut buf)?;
        form_items.push(FormItem { name, value });
    }

    let file_count = get_u32(&mut buf)?;
    let mut file_specs = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let name = get_string(&mut buf)?;
        let path = get_string(&mut buf)?;
        let file_name = get_string(&mut buf)?;
        let mime_type = get_string(&mut buf)?;
        let is_user_file = read_u8(&mut buf)? != 0;
        file_specs.push(FileSpec {
            name,
            path,
            file_name,
            mime_type,
            is_user_file,
        });
    }

    let mode = mode_from_u8(read_u8(&mut buf)?);
    let version = version_from_u8(read_u8(&mut buf)?);
    let network = network_from_u8(read_u8(&mut buf)?);
    let overwrite = read_u8(&mut buf)? != 0;
    let metered_allowed = read_u8(&mut buf)? != 0;
    let roaming_allowed = read_u8(&mut buf)? != 0;
    let retry_enabled = read_u8(&mut buf)? != 0;
    let redirect_enabled = read_u8(&mut buf)? != 0;
    let gauge = read_u8(&mut buf)? != 0;
    let precise = read_u8(&mut buf)? != 0;
    let background = read_u8(&mut buf)? != 0;
    let begins = read_u64(&mut buf)?;
    let ends = read_u64(&mut buf)? as i64;
    let min_speed_speed = read_u64(&mut buf)?;
    let min_speed_duration = read_u64(&mut buf)?;
    let connect_timeout_secs = read_u64(&mut buf)?;
    let total_timeout_secs = read_u64(&mut buf)?;

    Ok(PartialConfig {
        method,
        title,
        description,
        headers,
        form_items,
        file_specs,
        mode,
        version,
        network,
        overwrite,
        metered_allowed,
        roaming_allowed,
        retry_enabled,
        redirect_enabled,
        gauge,
        precise,
        background,
        range: ByteRange { begins, ends },
        min_speed: MinSpeed {
            speed: min_speed_speed,
            duration_ms: min_speed_duration,
        },
        timeout: TimeoutConfig {
            connect_timeout_secs,
            total_timeout_secs,
        },
    })
}

/// Everything [`decode`] can rebuild from the blob; `Default` yields the
/// teacher's original bare-bones fallback for blobs from before this codec
/// existed.
pub(crate) struct PartialConfig {
    pub(crate) method: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) headers: std::collections::HashMap<String, String>,
    pub(crate) form_items: Vec<FormItem>,
    pub(crate) file_specs: Vec<FileSpec>,
    pub(crate) mode: Mode,
    pub(crate) version: Version,
    pub(crate) network: NetworkConfig,
    pub(crate) overwrite: bool,
    pub(crate) metered_allowed: bool,
    pub(crate) roaming_allowed: bool,
    pub(crate) retry_enabled: bool,
    pub(crate) redirect_enabled: bool,
    pub(crate) gauge: bool,
    pub(crate) precise: bool,
    pub(crate) background: bool,
    pub(crate) range: ByteRange,
    pub(crate) min_speed: MinSpeed,
    pub(crate) timeout: TimeoutConfig,
}

impl Default for PartialConfig {
    fn default() -> Self {
        let defaults = CommonTaskConfig::default();
        PartialConfig {
            method: "GET".to_string(),
            title: String::new(),
            description: String::new(),
            headers: Default::default(),
            form_items: Vec::new(),
            file_specs: Vec::new(),
            mode: defaults.mode,
            version: Version::V10,
            network: defaults.network,
            overwrite: defaults.overwrite,
            metered_allowed: defaults.metered_allowed,
            roaming_allowed: defaults.roaming_allowed,
            retry_enabled: defaults.retry_enabled,
            redirect_enabled: defaults.redirect_enabled,
            gauge: defaults.gauge,
            precise: defaults.precise,
            background: defaults.background,
            range: defaults.range,
            min_speed: defaults.min_speed,
            timeout: defaults.timeout,
        }
    }
}

fn read_u8(buf: &mut Bytes) -> Result<u8, ErrorCode> {
    if buf.remaining() < 1 {
        return Err(ErrorCode::ParameterCheck);
    }
    Ok(buf.get_u8())
}

fn read_u64(buf: &mut Bytes) -> Result<u64, ErrorCode> {
    if buf.remaining() < 8 {
        return Err(ErrorCode::ParameterCheck);
    }
    Ok(buf.get_u64_le())
}

fn mode_from_u8(v: u8) -> Mode {
    match v {
        1 => Mode::Foreground,
        2 => Mode::Any,
        _ => Mode::Background,
    }
}

fn version_from_u8(v: u8) -> Version {
    match v {
        9 => Version::V9,
        _ => Version::V10,
    }
}

fn network_from_u8(v: u8) -> NetworkConfig {
    match v {
        1 => NetworkConfig::Wifi,
        2 => NetworkConfig::Cellular,
        _ => NetworkConfig::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::{Action, ConfigBuilder};

    #[test]
    fn round_trips_headers_form_items_and_file_specs() {
        let mut config = ConfigBuilder::new()
            .bundle("com.example")
            .url("https://example.com/f")
            .action(Action::Upload)
            .file_spec(FileSpec::new("file", "/tmp/a.bin"))
            .build();
        config.headers.insert("X-Test".to_string(), "1".to_string());
        config.form_items.push(FormItem {
            name: "field".to_string(),
            value: "value".to_string(),
        });
        config.title = "title".to_string();

        let blob = encode(&config);
        let decoded = decode(&blob).unwrap();

        assert_eq!(decoded.method, "POST");
        assert_eq!(decoded.title, "title");
        assert_eq!(decoded.headers.get("X-Test"), Some(&"1".to_string()));
        assert_eq!(decoded.form_items.len(), 1);
        assert_eq!(decoded.file_specs.len(), 1);
        assert_eq!(decoded.file_specs[0].path, "/tmp/a.bin");
    }

    #[test]
    fn empty_blob_decodes_to_defaults() {
        let decoded = decode(&[]).unwrap();
        assert_eq!(decoded.method, "GET");
        assert!(decoded.file_specs.is_empty());
    }
}
