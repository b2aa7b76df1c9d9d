use core::{fmt, time::Duration};
use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, DurationSeconds, PickFirst, serde_as};
use tracing::info;

use super::{DumpError, DumpProcess, DumpSource};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// The dump tool to run.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Mysql,
    Postgres,
}

/// Dump a relational database with its engine's dump tool.
#[serde_as]
#[derive(Clone, Deserialize, Serialize)]
pub struct Relational {
    /// The dump tool to run.
    #[serde(default)]
    pub flavor: Flavor,

    /// The database host.
    #[serde(alias = "HOST")]
    pub host: String,

    /// The database port, the tool's default when unset.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(alias = "PORT")]
    pub port: Option<u16>,

    /// The database user.
    #[serde(alias = "USER")]
    pub user: String,

    /// The database user's password.
    #[serde(alias = "PASSWORD")]
    pub password: String,

    /// The database to dump.
    #[serde(alias = "NAME")]
    pub name: String,

    /// Kill the dump tool after this many seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_seconds", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Relational {
    /// The process producing the dump. The password is passed through the
    /// environment so it never shows up in process listings.
    pub fn command(&self) -> DumpProcess {
        let port = self.port.map(|port| port.to_string());

        let (program, args, password_variable) = match self.flavor {
            Flavor::Mysql => {
                let mut args = vec![self.name.clone(), "-h".into(), self.host.clone()];
                if let Some(port) = port {
                    args.extend(["-P".into(), port]);
                }
                args.extend(["-u".into(), self.user.clone()]);

                ("mysqldump", args, "MYSQL_PWD")
            }
            Flavor::Postgres => {
                let mut args = vec!["-h".into(), self.host.clone()];
                if let Some(port) = port {
                    args.extend(["-p".into(), port]);
                }
                args.extend([
                    "-U".into(),
                    self.user.clone(),
                    "-d".into(),
                    self.name.clone(),
                ]);

                ("pg_dump", args, "PGPASSWORD")
            }
        };

        DumpProcess {
            program: program.into(),
            args,
            envs: vec![(password_variable.into(), self.password.clone())],
            timeout: Some(self.timeout),
        }
    }
}

impl DumpSource for Relational {
    fn produce(&self) -> Result<Box<dyn Read>, DumpError> {
        info!("Dumping {:?} database '{}' from {}", self.flavor, self.name, self.host);

        let stream = self.command().spawn()?;
        Ok(Box::new(stream))
    }

    fn default_prefix(&self) -> String {
        match self.flavor {
            Flavor::Mysql => format!("mysqldump_{}", self.name),
            Flavor::Postgres => format!("pgdump_{}", self.name),
        }
    }

    fn default_extension(&self) -> String {
        "sql".into()
    }
}

impl Default for Relational {
    fn default() -> Self {
        Self {
            flavor: Flavor::Mysql,
            host: "localhost".into(),
            port: Some(3306),
            user: "backup".into(),
            password: String::new(),
            name: "database".into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl fmt::Debug for Relational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relational")
            .field("flavor", &self.flavor)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}
