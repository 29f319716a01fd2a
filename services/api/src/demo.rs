use crate::infra::{load_catalog, InMemoryApplicationStore};
use clap::Args;
use loan_portal::config::AppConfig;
use loan_portal::error::AppError;
use loan_portal::workflows::origination::{
    Actor, ActorRole, ApplicationStatus, ChecklistSummary, FileRef, LoanApplicationService,
    LoanProgram, OfficeAccessPolicy, ProgramId, ReviewDecision,
};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct ProgramsArgs {
    /// Print the full catalog as JSON instead of a summary table.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Loan program to originate.
    #[arg(long, default_value = "DSCR")]
    pub(crate) program: String,
    /// Write the progress report CSV to this path instead of stdout.
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
}

pub(crate) fn list_programs(args: ProgramsArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let catalog = load_catalog(&config.catalog)?;

    if args.json {
        let programs = catalog.active().collect::<Vec<_>>();
        let rendered = serde_json::to_string_pretty(&programs)
            .map_err(|err| AppError::Io(io::Error::new(io::ErrorKind::Other, err)))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("Loan programs");
    for program in catalog.active() {
        println!(
            "- {} ({}) | {} | {} sections, {} required fields | {} documents ({} required) | gate: {:?}",
            program.id.0,
            program.name,
            program.category.label(),
            program.field_groups.len(),
            program.required_field_count(),
            program.checklist.len(),
            program.checklist.iter().filter(|item| item.required).count(),
            program.submission.documents,
        );
    }
    let retired = catalog
        .programs()
        .iter()
        .filter(|program| program.retired)
        .map(|program| program.id.0.as_str())
        .collect::<Vec<_>>();
    if !retired.is_empty() {
        println!("Retired (existing applications only): {}", retired.join(", "));
    }

    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let catalog = Arc::new(load_catalog(&config.catalog)?);
    let service = LoanApplicationService::with_retry_policy(
        catalog.clone(),
        Arc::new(InMemoryApplicationStore::default()),
        Arc::new(OfficeAccessPolicy),
        config.store.retry_policy(),
    );

    let program = service.program(&ProgramId::new(args.program.trim()))?.clone();
    let broker = Actor::new("broker-demo", ActorRole::Broker);
    let borrower = Actor::new("borrower-demo", ActorRole::Borrower);
    let underwriter = Actor::new("underwriter-demo", ActorRole::Workforce);

    println!("Loan portal demo: {} ({})", program.name, program.id.0);

    let draft = service
        .create_application(&program.id, &broker, Some(borrower.id.clone()))
        .await?;
    let id = draft.application_id().clone();
    println!(
        "- {} opened {} for {} in the {} office",
        broker.id,
        id.0,
        borrower.id,
        draft.office_context.label()
    );

    for group in &program.field_groups {
        let record = service
            .update_section(&id, &group.key, sample_payload(&program, &group.key), &broker)
            .await?;
        let view = service.view(record.application_id(), &broker).await?;
        println!(
            "  saved {:<28} overall {:>5.1}% | next: {}",
            group.key,
            view.progress.overall_percent,
            view.navigation
                .next_step_path
                .as_deref()
                .unwrap_or("ready to submit")
        );
    }

    for item in program.checklist.iter().filter(|item| item.required) {
        service
            .upload_document(
                &id,
                &item.document_type,
                FileRef(format!("demo/{}/{}.pdf", id.0, item.document_type)),
                &borrower,
            )
            .await?;
    }
    let uploaded = service.get(&id).await?;
    print_checklist(&program, &ChecklistSummary::from_documents(&program.checklist, uploaded.documents()));

    for item in program.checklist.iter().filter(|item| item.required) {
        service
            .review_document(&id, &item.document_type, ReviewDecision::Approve, &underwriter)
            .await?;
    }

    service
        .transition_status(&id, ApplicationStatus::Submitted, &broker)
        .await?;
    let record = service
        .transition_status(&id, ApplicationStatus::UnderReview, &underwriter)
        .await?;
    println!(
        "- status {} after {} history entries",
        record.status().label(),
        record.history().len()
    );

    for actor in [&borrower, &broker, &underwriter] {
        let dashboard = service.applications_for(actor).await?;
        println!(
            "- {} dashboard: {} application(s)",
            actor.role.label(),
            dashboard.len()
        );
    }

    match args.csv {
        Some(path) => {
            let rows = service
                .export_progress(&underwriter, BufWriter::new(File::create(&path)?))
                .await?;
            println!("- wrote {rows} row(s) to {}", path.display());
        }
        None => {
            println!("\nProgress report");
            service.export_progress(&underwriter, io::stdout()).await?;
        }
    }

    Ok(())
}

fn print_checklist(program: &LoanProgram, summary: &ChecklistSummary) {
    println!(
        "- checklist: {}/{} documents uploaded, {} pending review, gate {:?}",
        summary.total - summary.not_submitted,
        summary.total,
        summary.pending_review,
        program.submission.documents
    );
}

/// Wizard input a broker might key in for `section`.
fn sample_payload(program: &LoanProgram, section: &str) -> Value {
    let Some(group) = program.field_group(section) else {
        return json!({});
    };
    let fields = group
        .required_fields
        .iter()
        .map(|field| (field.clone(), sample_value(field)))
        .collect::<serde_json::Map<String, Value>>();
    Value::Object(fields)
}

fn sample_value(field: &str) -> Value {
    match field {
        "fullName" => json!("Jordan Reyes"),
        "email" => json!("jordan.reyes@example.com"),
        "creditScore" => json!(728),
        "propertyAddress" => json!("410 Alder Street, Boise ID"),
        "propertyType" => json!("duplex"),
        "entityType" => json!("llc"),
        "ein" => json!("84-1234567"),
        "exitStrategy" => json!("refinance"),
        "projectedCompletion" => json!("2027-04-30"),
        "drawSchedule" => json!([
            { "description": "Foundation", "amount": 80000.0 },
            { "description": "Vertical", "amount": 160000.0 }
        ]),
        "constructionBudget" => json!(320000),
        "contractAmount" => json!(750000),
        "mobilizationAmount" => json!(75000),
        "termMonths" | "yearsInBusiness" => json!(12),
        field if is_amount(field) => json!(250000),
        _ => json!("on file"),
    }
}

fn is_amount(field: &str) -> bool {
    const NUMERIC_SUFFIXES: [&str; 9] = [
        "Amount", "Price", "Value", "Budget", "Cost", "Rent", "Revenue", "Income", "Assets",
    ];
    NUMERIC_SUFFIXES.iter().any(|suffix| field.ends_with(suffix))
        || matches!(field, "totalLiabilities" | "acreage")
}
