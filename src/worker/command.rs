//! The sysbench command line.
//!
//! Only a fixed set of flags is ever passed. The process is spawned from an
//! argument vector, never through a shell; [`SysbenchCommand::display`]
//! renders the shell form for logs with every value escaped on its own and
//! the password hidden.

use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use shell_escape::escape;

use crate::scheduler::{BenchParams, Instance};

/// Flags sysbench is allowed to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchFlag {
    Threads,
    Time,
    MysqlDb,
    MysqlUser,
    MysqlPassword,
    MysqlHost,
    MysqlPort,
}

impl BenchFlag {
    pub fn name(self) -> &'static str {
        match self {
            BenchFlag::Threads => "threads",
            BenchFlag::Time => "time",
            BenchFlag::MysqlDb => "mysql-db",
            BenchFlag::MysqlUser => "mysql-user",
            BenchFlag::MysqlPassword => "mysql-password",
            BenchFlag::MysqlHost => "mysql-host",
            BenchFlag::MysqlPort => "mysql-port",
        }
    }

    fn is_secret(self) -> bool {
        self == BenchFlag::MysqlPassword
    }
}

const REDACTED: &str = "******";

#[derive(Debug, Clone)]
pub struct SysbenchCommand {
    program: PathBuf,
    script: PathBuf,
    flags: Vec<(BenchFlag, String)>,
}

impl SysbenchCommand {
    /// Build the command for one job run.
    pub fn for_job(
        program: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
        params: &BenchParams,
        instance: &Instance,
    ) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            flags: vec![
                (BenchFlag::Threads, params.threads.to_string()),
                (BenchFlag::Time, params.duration_secs.to_string()),
                (BenchFlag::MysqlDb, params.db_name.clone()),
                (BenchFlag::MysqlUser, instance.user.clone()),
                (BenchFlag::MysqlPassword, instance.password.clone()),
                (BenchFlag::MysqlHost, instance.host.clone()),
                (BenchFlag::MysqlPort, instance.port.to_string()),
            ],
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn flag(&self, flag: BenchFlag) -> Option<&str> {
        self.flags
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|(_, value)| value.as_str())
    }

    /// Arguments after the program: script, flags, then `run`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.flags.len() + 2);
        args.push(self.script.clone().into_os_string());
        for (flag, value) in &self.flags {
            args.push(OsString::from(format!("--{}={}", flag.name(), value)));
        }
        args.push(OsString::from("run"));
        args
    }

    /// Shell rendering for logs and the run record.
    pub fn display(&self) -> String {
        let mut parts = vec![
            quote(&self.program.to_string_lossy()),
            quote(&self.script.to_string_lossy()),
        ];
        for (flag, value) in &self.flags {
            let value = if flag.is_secret() {
                REDACTED.to_string()
            } else {
                quote(value)
            };
            parts.push(format!("--{}={}", flag.name(), value));
        }
        parts.push("run".to_string());
        parts.join(" ")
    }
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InstanceId;

    fn fixture() -> SysbenchCommand {
        let params = BenchParams {
            threads: 8,
            duration_secs: 60,
            db_name: "shop; rm -rf /".to_string(),
            sql_template: "select 1".to_string(),
            sql_params: Vec::new(),
            param_delimiter: ",".to_string(),
            params_sync: false,
        };
        let instance = Instance {
            id: InstanceId(1),
            name: "primary".to_string(),
            host: "10.0.0.5".to_string(),
            port: 3306,
            user: "bench".to_string(),
            password: "s3cr'et".to_string(),
        };
        SysbenchCommand::for_job("sysbench", "/tmp/shop_1.lua", &params, &instance)
    }

    #[test]
    fn args_are_allow_listed_and_end_with_run() {
        let args: Vec<String> = fixture()
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "/tmp/shop_1.lua",
                "--threads=8",
                "--time=60",
                "--mysql-db=shop; rm -rf /",
                "--mysql-user=bench",
                "--mysql-password=s3cr'et",
                "--mysql-host=10.0.0.5",
                "--mysql-port=3306",
                "run",
            ]
        );
    }

    #[test]
    fn display_escapes_values_and_hides_password() {
        let shown = fixture().display();
        assert!(shown.contains("--mysql-db='shop; rm -rf /'"));
        assert!(shown.contains("--mysql-password=******"));
        assert!(!shown.contains("s3cr"));
        assert!(shown.ends_with(" run"));
    }

    #[test]
    fn flag_lookup() {
        let command = fixture();
        assert_eq!(command.flag(BenchFlag::MysqlPort), Some("3306"));
        assert_eq!(command.flag(BenchFlag::Threads), Some("8"));
    }
}
