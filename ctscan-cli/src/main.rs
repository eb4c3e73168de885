//! CT 影像分诊客户端命令行程序

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ctscan_acquisition::{FilePicker, ImageAcquirer};
use ctscan_client::{ApiClient, ClientConfig, ConfigValidator, ScanApi};
use ctscan_core::utils::mask_pii;
use ctscan_core::{
    filter_records, ApiError, CtScanError, NewPatient, ProfileExtras, ReportDraft,
};
use ctscan_storage::{FileStore, PatientSelection, ReportHandoff, SessionStore, SharedStore};
use ctscan_workflow::ScanWorkflow;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "ctscan")]
#[command(about = "CT 影像分诊客户端：上传影像、获取分类结果、保存记录")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 本地状态目录
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// 后端地址，覆盖配置
    #[arg(long)]
    api_url: Option<String>,

    /// 日志级别，未指定时读取 RUST_LOG，默认 info
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 登录并保存会话
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CTSCAN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// 注册医生账号并保存会话
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "CTSCAN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// 登出并清除本地会话
    Logout,
    /// 显示当前会话与选中的患者
    Whoami,
    /// 查看或修改医生资料
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// 后端健康检查
    Health,
    /// 工作量统计
    Stats,
    /// 患者名册
    Patients {
        #[command(subcommand)]
        action: PatientsCommand,
    },
    /// 选择下一次扫描的患者
    Select { patient_id: String },
    /// 上传影像并分类，可选保存与生成报告
    Scan {
        file: PathBuf,
        /// 影像 MIME 类型提示
        #[arg(long)]
        mime: Option<String>,
        /// 既往病史
        #[arg(long)]
        medical_history: Option<String>,
        /// 医生备注
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        save: bool,
        /// 保存后生成报告草稿
        #[arg(long, requires = "save")]
        report: bool,
    },
    /// 历史记录
    History {
        #[arg(long)]
        patient: Option<String>,
        /// 按患者姓名、诊断或患者ID过滤
        #[arg(long)]
        search: Option<String>,
        /// 把过滤后第 N 条记录（从 1 开始）交给报告
        #[arg(long)]
        report: Option<usize>,
    },
    /// 读取并清除待编辑的报告草稿
    Report {
        /// 只查看，不清除
        #[arg(long)]
        peek: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PatientsCommand {
    /// 列出患者
    List,
    /// 查看患者详情与扫描列表
    Show {
        patient_id: String,
        /// 同时选为当前患者
        #[arg(long)]
        select: bool,
    },
    /// 新增患者
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        blood_group: Option<String>,
        #[arg(long, default_value = "")]
        medical_history: String,
        #[arg(long, default_value = "")]
        doctor_notes: String,
        /// 新增后直接选为当前患者
        #[arg(long)]
        select: bool,
    },
}

/// 命令执行所需的组件
struct App {
    client: Arc<ApiClient>,
    store: SharedStore,
    session: SessionStore,
    selection: PatientSelection,
    handoff: ReportHandoff,
}

impl App {
    async fn open(args: &Args) -> Result<Self> {
        let mut config = ClientConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
        if let Some(url) = &args.api_url {
            config.api_url = url.clone();
        }
        if let Some(dir) = &args.state_dir {
            config.state_dir = dir.clone();
        }
        ConfigValidator::new().validate(&config)?;

        let store: SharedStore = Arc::new(
            FileStore::open_in_dir(&config.state_dir)
                .await
                .with_context(|| format!("Failed to open state in {}", config.state_dir.display()))?,
        );
        let client = Arc::new(ApiClient::new(&config)?);

        Ok(Self {
            client,
            session: SessionStore::new(store.clone()),
            selection: PatientSelection::new(store.clone()),
            handoff: ReportHandoff::new(store.clone()),
            store,
        })
    }

    async fn token(&self) -> Result<String> {
        Ok(self.session.token().await?.ok_or(CtScanError::NotSignedIn)?)
    }

    /// 后端拒绝令牌时清除本地会话
    async fn checked<T>(&self, result: std::result::Result<T, ApiError>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_unauthenticated() {
                    self.session.sign_out().await?;
                }
                Err(CtScanError::from(e).into())
            }
        }
    }

    fn workflow(&self) -> ScanWorkflow {
        let api: Arc<dyn ScanApi> = self.client.clone();
        ScanWorkflow::new(
            api,
            ImageAcquirer::new(),
            self.session.clone(),
            self.selection.clone(),
            ReportHandoff::new(self.store.clone()),
        )
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let app = App::open(&args).await?;

    match args.command {
        // 凭据错误不影响已保存的会话，不经过 checked
        Command::Login { email, password } => {
            let session = app.client.login(&email, &password).await.map_err(CtScanError::from)?;
            app.session.sign_in(&session.token, &session.profile).await?;
            println!("Signed in as {} <{}>", session.profile.name, session.profile.email);
        }
        Command::Signup { name, email, password } => {
            let session = app
                .client
                .signup(&name, &email, &password)
                .await
                .map_err(CtScanError::from)?;
            app.session.sign_in(&session.token, &session.profile).await?;
            println!("Registered and signed in as {} <{}>", session.profile.name, session.profile.email);
        }
        Command::Logout => {
            app.session.sign_out().await?;
            app.selection.clear().await?;
            println!("Signed out");
        }
        Command::Whoami => match app.session.current().await? {
            Some(session) => {
                println!("{} <{}>", session.profile.name, session.profile.email);
                if let Some(patient) = app.selection.load().await? {
                    println!(
                        "Selected patient: {} ({})",
                        patient.patient_name.as_deref().unwrap_or("Unknown"),
                        patient.patient_id
                    );
                }
            }
            None => println!("Not signed in"),
        },
        Command::Profile { name, age, department } => {
            if name.is_none() && age.is_none() && department.is_none() {
                let token = app.token().await?;
                let profile = app.checked(app.client.doctor_profile(&token).await).await?;
                print_json(&profile)?;
                if let Some(extras) = app.session.extras().await? {
                    print_json(&extras)?;
                }
            } else {
                let current = app.session.extras().await?.unwrap_or_default();
                let cached_name = app.session.profile().await?.map(|p| p.name).unwrap_or_default();
                let extras = ProfileExtras {
                    name: name.or(Some(current.name).filter(|n| !n.is_empty())).unwrap_or(cached_name),
                    age: age.unwrap_or(current.age),
                    department: department.unwrap_or(current.department),
                };
                let profile = app.session.save_extras(&extras).await?;
                println!("Profile updated: {}", profile.name);
            }
        }
        Command::Health => {
            let health = app.client.health().await.map_err(CtScanError::from)?;
            print_json(&health)?;
        }
        Command::Stats => {
            let token = app.token().await?;
            let stats = app.checked(app.client.stats(&token).await).await?;
            print_json(&stats)?;
        }
        Command::Patients { action } => match action {
            PatientsCommand::List => {
                let token = app.token().await?;
                for patient in app.checked(app.client.patients(&token).await).await? {
                    println!(
                        "{}\t{}\t{}\tscans: {}\tlast: {}",
                        patient.id,
                        patient.name,
                        patient.gender.as_deref().unwrap_or("-"),
                        patient.scan_count,
                        patient.last_scan.as_deref().unwrap_or("-")
                    );
                }
            }
            PatientsCommand::Show { patient_id, select } => {
                let token = app.token().await?;
                let detail = app.checked(app.client.patient(&patient_id, &token).await).await?;
                print_json(&detail)?;
                if select {
                    app.selection.select(&detail.to_active_patient()).await?;
                    println!("Selected patient {}", detail.id);
                }
            }
            PatientsCommand::Add {
                name,
                age,
                gender,
                id,
                blood_group,
                medical_history,
                doctor_notes,
                select,
            } => {
                let token = app.token().await?;
                let new_patient = NewPatient {
                    patient_id: id,
                    name,
                    age,
                    gender,
                    blood_group,
                    medical_history,
                    doctor_notes,
                };
                let created = app.checked(app.client.add_patient(&new_patient, &token).await).await?;
                println!("Added patient {} ({})", created.name, created.id);

                if select {
                    let mut patient = created.to_active_patient();
                    patient.medical_history = new_patient.medical_history.clone();
                    patient.doctor_notes = new_patient.doctor_notes.clone();
                    app.selection.select(&patient).await?;
                    println!("Selected patient {}", patient.patient_id);
                }
            }
        },
        Command::Select { patient_id } => {
            let token = app.token().await?;
            let roster = app.checked(app.client.patients(&token).await).await?;
            let patient = roster
                .iter()
                .find(|p| p.id == patient_id)
                .map(|p| p.to_active_patient())
                .ok_or_else(|| CtScanError::from(ApiError::NotFound(format!("Patient {} not found", patient_id))))?;
            app.selection.select(&patient).await?;
            info!("Selected patient {}", mask_pii(&patient.patient_id));
            println!(
                "Selected patient {} ({})",
                patient.patient_name.as_deref().unwrap_or("Unknown"),
                patient.patient_id
            );
        }
        Command::Scan {
            file,
            mime,
            medical_history,
            notes,
            save,
            report,
        } => {
            let workflow = app.workflow();
            let patient = workflow.enter().await?;
            println!(
                "Patient: {} ({})",
                patient.patient_name.as_deref().unwrap_or("Unknown"),
                patient.patient_id
            );
            if medical_history.is_some() || notes.is_some() {
                workflow.update_notes(medical_history, notes).await?;
            }

            let picker = FilePicker::new(&file).with_mime_hint(mime);
            let Some(image) = workflow.acquire(&picker).await? else {
                println!("No image selected");
                return Ok(());
            };
            println!("Image: {} ({} bytes, {})", file.display(), image.len(), image.mime_type);

            let prediction = workflow.classify().await?;
            println!(
                "Prediction: {} ({}%)",
                prediction.predicted_class,
                prediction.confidence_percent()
            );

            if save {
                let ack = workflow.save().await?;
                println!(
                    "{}",
                    ack.message.as_deref().unwrap_or("Record saved successfully")
                );
                if report {
                    let draft = workflow.hand_off_report().await?;
                    println!("Report draft ready for {}", draft.patient_id);
                }
            }
            print_json(&workflow.snapshot().await)?;
        }
        Command::History { patient, search, report } => {
            let token = app.token().await?;
            let records = match &patient {
                Some(id) => app.checked(app.client.patient_history(id, &token).await).await?,
                None => app.checked(app.client.history(&token).await).await?,
            };
            let filtered = filter_records(&records, search.as_deref().unwrap_or(""));

            for (index, record) in filtered.iter().enumerate() {
                println!(
                    "{:>3}. {}\t{}\t{}\t{}%\t{}",
                    index + 1,
                    record.timestamp.as_deref().unwrap_or("-"),
                    record.patient_name.as_deref().unwrap_or("Unknown"),
                    record.diagnosis,
                    record.confidence_percent(),
                    app.client.image_url(record).unwrap_or_default()
                );
            }

            if let Some(position) = report {
                let record = position
                    .checked_sub(1)
                    .and_then(|i| filtered.get(i))
                    .with_context(|| format!("No history record at position {}", position))?;
                let draft = ReportDraft::from_history_record(record, Utc::now());
                app.handoff.write(&draft).await?;
                println!("Report draft ready for {}", draft.patient_id);
            }
        }
        Command::Report { peek } => {
            let draft = if peek {
                app.handoff.peek().await?
            } else {
                app.handoff.take().await?
            };
            match draft {
                Some(draft) => print_json(&draft)?,
                None => println!("No report draft pending"),
            }
        }
    }

    Ok(())
}

/// 命令行参数优先，其次 RUST_LOG，最后 info
fn log_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志，输出到 stderr
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.log_level.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        if let Some(ctscan_error) = e.downcast_ref::<CtScanError>() {
            eprintln!("{}", ctscan_error.user_message());
        }
        error!("Command failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
