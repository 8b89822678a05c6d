use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use invigil::api::models::{AssignLecturerRequest, ChangePasswordRequest, PageRequest, SortDirection};
use invigil::api::{Counted, Courses, Departments, ExamSchedules, Lecturers, Resource, Roles, Users};
use invigil::{ApiClient, ApiError, AuthGateway, ErrorCode, GatewayConfig};
use serde::Serialize;

const SESSION_FILE_NAME: &str = ".invigil-session.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] invigil::error::ConfigError),
    #[error("gateway setup failed: {0}")]
    Gateway(#[from] invigil::GatewayError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("invalid {resource} id '{raw}'")]
    InvalidId { resource: &'static str, raw: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not signed in; run `invigil login`")]
    NotSignedIn,
}

#[derive(Parser, Debug)]
#[command(name = "invigil", about = "Exam invigilation backend CLI")]
struct Cli {
    /// Overrides INVIGIL_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Token file; defaults to INVIGIL_SESSION_FILE, then ~/.invigil-session.json.
    #[arg(long)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long, short)]
        username: String,
        #[arg(long, short, env = "INVIGIL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    ChangePassword {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[arg(long)]
        confirm: String,
    },
    Resource(ResourceCommand),
    Exam(ExamCommand),
    Payment(PaymentCommand),
    Stats(StatsCommand),
}

#[derive(Args, Debug)]
struct ResourceCommand {
    #[arg(value_enum)]
    kind: ResourceKind,

    #[command(subcommand)]
    action: ResourceAction,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Departments,
    Courses,
    Lecturers,
    Roles,
    Users,
    ExamSchedules,
}

#[derive(Subcommand, Debug)]
enum ResourceAction {
    List,
    Get {
        id: String,
    },
    Create {
        #[arg(long)]
        data: String,
    },
    Update {
        id: String,
        #[arg(long)]
        data: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug)]
struct ExamCommand {
    #[command(subcommand)]
    command: ExamSubcommand,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum AssignmentArg {
    Written,
    Other,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionArg {
    Asc,
    Desc,
}

#[derive(Subcommand, Debug)]
enum ExamSubcommand {
    Available {
        exam_id: i64,
    },
    Assigned {
        exam_id: i64,
    },
    Assign {
        exam_id: i64,
        #[arg(long, value_enum, default_value = "written")]
        kind: AssignmentArg,
        #[arg(long = "lecturer", required = true)]
        lecturers: Vec<i64>,
        #[arg(long)]
        room: String,
        #[arg(long)]
        students: u32,
    },
    Unassign {
        exam_id: i64,
        lecturer_id: i64,
    },
    Page {
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
        #[arg(long, default_value = "id")]
        sort_by: String,
        #[arg(long, value_enum, default_value = "desc")]
        direction: DirectionArg,
    },
    Search {
        keyword: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
}

#[derive(Args, Debug)]
struct PaymentCommand {
    #[command(subcommand)]
    command: PaymentSubcommand,
}

#[derive(Subcommand, Debug)]
enum PaymentSubcommand {
    List {
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
        #[arg(long, default_value = "id")]
        sort_by: String,
        #[arg(long, value_enum, default_value = "desc")]
        direction: DirectionArg,
    },
    All,
    Get {
        id: i64,
    },
    Salary {
        lecturer_id: i64,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct StatsCommand {
    #[command(subcommand)]
    command: StatsSubcommand,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum CountArg {
    ExamSchedules,
    Lecturers,
    Users,
    Departments,
}

#[derive(Subcommand, Debug)]
enum StatsSubcommand {
    Dashboard,
    Count {
        #[arg(value_enum)]
        what: CountArg,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let api = connect(cli.base_url.as_deref(), cli.session_file)?;

    let result = run(&api, cli.command).await;
    if let Err(CliError::Api(error)) = &result {
        tracing::debug!(code = error.error_code(), retryable = error.retryable(), "command failed");
        if error.is_session_expired() {
            eprintln!("session expired; run `invigil login` again");
        }
    }
    result
}

fn connect(base_url: Option<&str>, session_file: Option<PathBuf>) -> Result<ApiClient, CliError> {
    let mut config = GatewayConfig::from_env()?;
    if let Some(base_url) = base_url {
        config = config.with_base_url(base_url)?;
    }
    config.session_file = session_file
        .or(config.session_file)
        .or_else(default_session_file);
    Ok(ApiClient::new(AuthGateway::from_config(config)?))
}

fn default_session_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(SESSION_FILE_NAME))
}

async fn run(api: &ApiClient, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { username, password } => {
            let user = api.login(&username, &password).await?;
            match user {
                Some(user) => eprintln!("signed in as {}", user.username),
                None => eprintln!("signed in"),
            }
            Ok(())
        }
        Command::Logout => {
            api.logout();
            eprintln!("signed out");
            Ok(())
        }
        Command::Whoami => {
            let user = api.current_user().ok_or(CliError::NotSignedIn)?;
            print_json(&user)
        }
        Command::ChangePassword { old, new, confirm } => {
            let request = ChangePasswordRequest { old_password: old, new_password: new, confirm_password: confirm };
            api.change_password(&request).await?;
            eprintln!("password changed");
            Ok(())
        }
        Command::Resource(command) => run_resource_kind(api, command).await,
        Command::Exam(exam) => run_exam(api, exam.command).await,
        Command::Payment(payment) => run_payment(api, payment.command).await,
        Command::Stats(stats) => run_stats(api, stats.command).await,
    }
}

async fn run_resource_kind(api: &ApiClient, command: ResourceCommand) -> Result<(), CliError> {
    match command.kind {
        ResourceKind::Departments => run_resource::<Departments>(api, command.action).await,
        ResourceKind::Courses => run_resource::<Courses>(api, command.action).await,
        ResourceKind::Lecturers => run_resource::<Lecturers>(api, command.action).await,
        ResourceKind::Roles => run_resource::<Roles>(api, command.action).await,
        ResourceKind::Users => run_resource::<Users>(api, command.action).await,
        ResourceKind::ExamSchedules => run_resource::<ExamSchedules>(api, command.action).await,
    }
}

async fn run_resource<R: Resource>(api: &ApiClient, action: ResourceAction) -> Result<(), CliError> {
    match action {
        ResourceAction::List => print_json(&api.list::<R>().await?),
        ResourceAction::Get { id } => {
            let id = parse_id::<R>(&id)?;
            print_json(&api.fetch::<R>(&id).await?)
        }
        ResourceAction::Create { data } => {
            let body: R::Create = serde_json::from_str(&data)?;
            print_json(&api.create::<R>(&body).await?)
        }
        ResourceAction::Update { id, data } => {
            let id = parse_id::<R>(&id)?;
            let body: R::Update = serde_json::from_str(&data)?;
            print_json(&api.update::<R>(&id, &body).await?)
        }
        ResourceAction::Delete { id } => {
            let id = parse_id::<R>(&id)?;
            api.delete::<R>(&id).await?;
            eprintln!("deleted {} {id}", R::NAME);
            Ok(())
        }
    }
}

async fn run_exam(api: &ApiClient, command: ExamSubcommand) -> Result<(), CliError> {
    match command {
        ExamSubcommand::Available { exam_id } => print_json(&api.available_lecturers(exam_id).await?),
        ExamSubcommand::Assigned { exam_id } => {
            let ids: Vec<i64> = api
                .assigned_lecturers(exam_id)
                .await?
                .iter()
                .map(invigil::api::AssignedLecturer::lecturer_id)
                .collect();
            print_json(&ids)
        }
        ExamSubcommand::Assign { exam_id, kind, lecturers, room, students } => {
            let request = AssignLecturerRequest { lecturer_ids: lecturers, room, student_count: students };
            let outcome = match kind {
                AssignmentArg::Written => api.assign_written(exam_id, &request).await?,
                AssignmentArg::Other => api.assign_other(exam_id, &request).await?,
            };
            print_json(&outcome)
        }
        ExamSubcommand::Unassign { exam_id, lecturer_id } => {
            api.unassign_lecturer(exam_id, lecturer_id).await?;
            eprintln!("lecturer {lecturer_id} unassigned from exam {exam_id}");
            Ok(())
        }
        ExamSubcommand::Page { page, size, sort_by, direction } => {
            let request = PageRequest { page, size, sort_by, direction: direction.into() };
            print_json(&api.exam_schedules_page(&request).await?)
        }
        ExamSubcommand::Search { keyword, page, size } => {
            print_json(&api.search_exam_schedules(&keyword, page, size).await?)
        }
    }
}

async fn run_payment(api: &ApiClient, command: PaymentSubcommand) -> Result<(), CliError> {
    match command {
        PaymentSubcommand::List { page, size, sort_by, direction } => {
            let request = PageRequest { page, size, sort_by, direction: direction.into() };
            print_json(&api.payments_page(&request).await?)
        }
        PaymentSubcommand::All => print_json(&api.all_payments().await?),
        PaymentSubcommand::Get { id } => print_json(&api.payment(id).await?),
        PaymentSubcommand::Salary { lecturer_id } => print_json(&api.lecturer_salary(lecturer_id).await?),
        PaymentSubcommand::Delete { id } => {
            api.delete_payment(id).await?;
            eprintln!("deleted payment {id}");
            Ok(())
        }
    }
}

async fn run_stats(api: &ApiClient, command: StatsSubcommand) -> Result<(), CliError> {
    match command {
        StatsSubcommand::Dashboard => print_json(&api.dashboard_statistics().await?),
        StatsSubcommand::Count { what } => {
            let what = match what {
                CountArg::ExamSchedules => Counted::ExamSchedules,
                CountArg::Lecturers => Counted::Lecturers,
                CountArg::Users => Counted::Users,
                CountArg::Departments => Counted::Departments,
            };
            println!("{}", api.count(what).await?);
            Ok(())
        }
    }
}

impl From<DirectionArg> for SortDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Asc => SortDirection::Asc,
            DirectionArg::Desc => SortDirection::Desc,
        }
    }
}

fn parse_id<R: Resource>(raw: &str) -> Result<R::Id, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidId { resource: R::NAME, raw: raw.to_owned() })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_commands() {
        let cli = Cli::try_parse_from(["invigil", "resource", "exam-schedules", "get", "7"]).unwrap();
        match cli.command {
            Command::Resource(ResourceCommand { kind, action: ResourceAction::Get { id } }) => {
                assert_eq!(kind, ResourceKind::ExamSchedules);
                assert_eq!(id, "7");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn assign_requires_a_lecturer() {
        let parsed = Cli::try_parse_from(["invigil", "exam", "assign", "7", "--room", "A1", "--students", "40"]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from([
            "invigil", "exam", "assign", "7", "--lecturer", "3", "--lecturer", "4", "--room", "A1", "--students", "40",
        ])
        .unwrap();
        match cli.command {
            Command::Exam(ExamCommand { command: ExamSubcommand::Assign { kind, lecturers, .. } }) => {
                assert_eq!(kind, AssignmentArg::Written);
                assert_eq!(lecturers, vec![3, 4]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_payment_and_stats_commands() {
        let cli = Cli::try_parse_from(["invigil", "payment", "list", "--page", "2", "--direction", "asc"]).unwrap();
        match cli.command {
            Command::Payment(PaymentCommand { command: PaymentSubcommand::List { page, size, direction, .. } }) => {
                assert_eq!((page, size), (2, 10));
                assert_eq!(SortDirection::from(direction), SortDirection::Asc);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["invigil", "stats", "count", "exam-schedules"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Stats(StatsCommand { command: StatsSubcommand::Count { what: CountArg::ExamSchedules } })
        ));
    }

    #[test]
    fn ids_parse_per_resource() {
        assert_eq!(parse_id::<Courses>(" 12 ").unwrap(), 12);
        assert_eq!(parse_id::<Users>("9f1c").unwrap(), "9f1c");
        assert!(matches!(parse_id::<Courses>("abc"), Err(CliError::InvalidId { resource: "course", .. })));
    }
}
