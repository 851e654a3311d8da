use std::{
    io::{self, Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::debug;

use crate::{
    error::{ErrorWrap, JsonError, PluginError, PluginResult},
    network::{constants, types::CniResult, version},
    wrap,
};

/// CNI_* variables handed to the IPAM plugin. They are set on the child
/// process only, our own environment is never touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegateEnv {
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    pub args: String,
    pub path: String,
}

impl DelegateEnv {
    pub fn vars(&self, command: &str) -> Vec<(&'static str, String)> {
        vec![
            (constants::ENV_COMMAND, command.to_string()),
            (constants::ENV_CONTAINER_ID, self.container_id.clone()),
            (constants::ENV_NETNS, self.netns.clone()),
            (constants::ENV_IFNAME, self.ifname.clone()),
            (constants::ENV_ARGS, self.args.clone()),
            (constants::ENV_PATH, self.path.clone()),
        ]
    }
}

/// Allocates and releases addresses for a sandbox.
pub trait IpamDelegate {
    /// Allocate an address, the result is converted to the current schema.
    fn exec_add(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<CniResult>;

    fn exec_del(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<()>;

    fn exec_check(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<()>;
}

/// Result of plugin execution
enum ExecResult {
    Success(Vec<u8>),
    Error { code: i32, buffer: Vec<u8> },
    Killed,
}

/// Runs the IPAM plugin binary found in CNI_PATH.
#[derive(Debug, Default)]
pub struct ExecDelegate;

impl ExecDelegate {
    fn exec(
        &self,
        plugin: &str,
        command: &str,
        env: &DelegateEnv,
        config: &[u8],
    ) -> PluginResult<Vec<u8>> {
        let plugin_path = find_plugin(plugin, &env.path)?;
        debug!("Executing ipam plugin {plugin_path:?} for {command}");

        let result = match exec_plugin(&plugin_path, env.vars(command), config)? {
            ExecResult::Success(buffer) => Ok(buffer),
            ExecResult::Error { code, buffer } => Err(handle_plugin_error(code, &buffer)),
            // If we could not get the exit code then the process was killed by a signal.
            ExecResult::Killed => Err(PluginError::msg("killed by signal")),
        };
        result.wrap(format!("ipam plugin {plugin:?} failed"))
    }
}

impl IpamDelegate for ExecDelegate {
    fn exec_add(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<CniResult> {
        let buffer = self.exec(plugin, "ADD", env, config)?;
        version::decode_result(&buffer)
            .wrap(format!("ipam plugin {plugin:?} returned an invalid result"))
    }

    fn exec_del(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<()> {
        self.exec(plugin, "DEL", env, config)?;
        Ok(())
    }

    fn exec_check(&self, plugin: &str, env: &DelegateEnv, config: &[u8]) -> PluginResult<()> {
        self.exec(plugin, "CHECK", env, config)?;
        Ok(())
    }
}

/// Look up the plugin binary in the `:` separated search path,
/// the first regular executable file wins.
pub fn find_plugin(plugin: &str, search_path: &str) -> PluginResult<PathBuf> {
    if plugin.is_empty() {
        return Err(PluginError::config(
            "\"ipam.type\" is not set, there is no IPAM plugin to delegate to",
        ));
    }
    if plugin.contains('/') {
        return Err(PluginError::config(format!(
            "invalid plugin name {plugin:?}, must not contain \"/\""
        )));
    }

    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .find_map(|dir| {
            let path = Path::new(dir).join(plugin);
            if let Ok(meta) = path.metadata() {
                if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                    return Some(path);
                }
            }
            None
        })
        .ok_or_else(|| {
            PluginError::msg(format!(
                "failed to find plugin {plugin:?} in path [{search_path}]"
            ))
        })
}

/// Turn the CNI error object printed by a failed plugin into an error
/// which keeps the plugin's error code.
fn handle_plugin_error(rc: i32, buffer: &[u8]) -> PluginError {
    match serde_json::from_slice::<JsonError>(buffer) {
        Ok(err) => {
            let code = if err.code == 0 {
                constants::ERR_GENERIC
            } else {
                err.code
            };
            let msg = if err.details.is_empty() {
                err.msg
            } else {
                format!("{}: {}", err.msg, err.details)
            };
            PluginError::Delegate { code, msg }
        }
        Err(e) => PluginError::msg(format!(
            "exit code {rc}, and failed to parse error message: {e}"
        )),
    }
}

/// Spawn the plugin with the given environment, feed it the raw config and
/// collect its stdout. stderr is passed through so plugin logs stay visible.
fn exec_plugin(
    plugin_path: &Path,
    vars: Vec<(&'static str, String)>,
    config: &[u8],
) -> PluginResult<ExecResult> {
    let mut child = wrap!(
        Command::new(plugin_path)
            .envs(vars)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn(),
        "spawn plugin"
    )?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PluginError::msg("failed to open plugin stdin"))?;
    match stdin.write_all(config) {
        Ok(()) => {}
        // the plugin does not have to read its config
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
        Err(err) => return Err(PluginError::wrap("write plugin stdin", err.into())),
    }
    // Close stdin here to avoid that the plugin waits forever for an EOF.
    drop(stdin);

    let mut buffer: Vec<u8> = Vec::new();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::msg("failed to open plugin stdout"))?;
    // Do not handle error here, we have to wait for the child first.
    let result = stdout.read_to_end(&mut buffer);

    let exit_status = wrap!(child.wait(), "wait for plugin to exit")?;
    match exit_status.code() {
        Some(rc) => {
            wrap!(result, "read plugin output")?;
            if rc == 0 {
                Ok(ExecResult::Success(buffer))
            } else {
                Ok(ExecResult::Error { code: rc, buffer })
            }
        }
        None => Ok(ExecResult::Killed),
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Mutex};

    use super::*;

    // Writing a script while another test forks can leave the write fd open in
    // the child for a moment and make exec fail with ETXTBSY.
    static EXEC_LOCK: Mutex<()> = Mutex::new(());

    fn plugin_dir() -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix("stable-ipam-plugins")
            .tempdir()
            .unwrap()
    }

    fn write_plugin(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn env_for(dir: &Path) -> DelegateEnv {
        DelegateEnv {
            container_id: "abc".to_string(),
            netns: "/var/run/netns/test".to_string(),
            ifname: "net1".to_string(),
            args: "IgnoreUnknown=1;mac=02:00:00:00:00:01".to_string(),
            path: format!("/nonexistent:{}", dir.display()),
        }
    }

    #[test]
    fn test_find_plugin() {
        let dir = plugin_dir();
        write_plugin(dir.path(), "host-local", "exit 0");
        fs::write(dir.path().join("not-exec"), "").unwrap();

        let search = format!("::/nonexistent:{}", dir.path().display());
        assert_eq!(
            find_plugin("host-local", &search).unwrap(),
            dir.path().join("host-local")
        );
        assert!(find_plugin("not-exec", &search).is_err());
        assert!(find_plugin("missing", &search).is_err());

        let err = find_plugin("", &search).expect_err("no plugin name");
        assert!(matches!(err, PluginError::Config(_)), "{err}");
        assert!(err.to_string().contains("ipam.type"), "{err}");

        let err = find_plugin("../host-local", &search).expect_err("path in plugin name");
        assert_eq!(err.code(), constants::CNI_ERR_INVALID_NETWORK_CONFIG);
    }

    #[test]
    fn test_exec_add_forwards_env_and_stdin() {
        let _guard = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = plugin_dir();
        let out = dir.path().join("out");
        write_plugin(
            dir.path(),
            "host-local",
            &format!(
                r#"cat > {out}.stdin
env | grep ^CNI_ | sort > {out}.env
echo '{{"cniVersion":"0.3.1","ips":[{{"version":"4","address":"10.0.0.5/24","gateway":"10.0.0.1"}}]}}'"#,
                out = out.display()
            ),
        );

        let config = br#"{"cniVersion":"0.3.1","name":"vmnet"}"#;
        let result = ExecDelegate
            .exec_add("host-local", &env_for(dir.path()), config)
            .unwrap();
        assert_eq!(result.ips[0].address.to_string(), "10.0.0.5/24");

        assert_eq!(fs::read(dir.path().join("out.stdin")).unwrap(), config);
        let env = fs::read_to_string(dir.path().join("out.env")).unwrap();
        assert!(env.contains("CNI_COMMAND=ADD\n"), "{env}");
        assert!(env.contains("CNI_CONTAINERID=abc\n"), "{env}");
        assert!(env.contains("CNI_IFNAME=net1\n"), "{env}");
        assert!(
            env.contains("CNI_ARGS=IgnoreUnknown=1;mac=02:00:00:00:00:01\n"),
            "{env}"
        );
    }

    #[test]
    fn test_exec_error_keeps_code() {
        let _guard = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = plugin_dir();
        write_plugin(
            dir.path(),
            "host-local",
            r#"echo '{"cniVersion":"1.0.0","code":11,"msg":"no addresses left","details":"range 10.0.0.0/24"}'
exit 1"#,
        );

        let err = ExecDelegate
            .exec_del("host-local", &env_for(dir.path()), b"{}")
            .expect_err("plugin fails");
        assert_eq!(err.code(), 11);
        assert_eq!(
            err.to_string(),
            "ipam plugin \"host-local\" failed: no addresses left: range 10.0.0.0/24"
        );
    }

    #[test]
    fn test_exec_error_unparsable() {
        let _guard = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = plugin_dir();
        write_plugin(dir.path(), "host-local", "echo oops\nexit 3");

        let err = ExecDelegate
            .exec_check("host-local", &env_for(dir.path()), b"{}")
            .expect_err("plugin fails");
        assert_eq!(err.code(), constants::ERR_GENERIC);
        assert!(err.to_string().contains("exit code 3"), "{err}");
    }

    #[test]
    fn test_exec_add_malformed_result() {
        let _guard = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = plugin_dir();
        write_plugin(dir.path(), "host-local", "echo '{\"ips\": 5}'");

        let err = ExecDelegate
            .exec_add("host-local", &env_for(dir.path()), b"{}")
            .expect_err("malformed result");
        assert_eq!(err.code(), constants::CNI_ERR_DECODE);
    }

    #[test]
    fn test_exec_del_ignores_stdout() {
        let _guard = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = plugin_dir();
        write_plugin(dir.path(), "host-local", "exit 0");

        ExecDelegate
            .exec_del("host-local", &env_for(dir.path()), b"{}")
            .unwrap();
    }
}
