use crate::data::{load_rows, split_dataset};
use crate::task::TaskFile;
use anyhow::{Context, Result};
use chrono::Utc;
use promptc_common::{human_readable_id, Example, MetricKind};
use promptc_core::{
    logger_from_config, CompileRequest, Compiler, JsonFileStore, MetricFactory, ModelSet,
    ProgramStore, PromptcConfig, Tracker,
};
use promptc_llm::{build_embeddings, build_model};
use promptc_serving::ServingStack;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub fn load_config(path: Option<&Path>, store: Option<PathBuf>) -> Result<PromptcConfig> {
    let mut config = match path {
        Some(path) => PromptcConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PromptcConfig::from_env()?,
    };
    if let Some(root) = store {
        config.store.root = root;
    }
    Ok(config)
}

fn open_store(config: &PromptcConfig) -> Arc<dyn ProgramStore> {
    Arc::new(JsonFileStore::new(config.store.root.clone()))
}

fn serving_stack(config: &PromptcConfig) -> Result<ServingStack> {
    let lm = build_model(&config.lm.model, &config.lm)?;
    let tracker = Tracker::new(logger_from_config(&config.tracking));
    Ok(ServingStack::new(
        open_store(config),
        lm,
        &config.serving,
        tracker,
        config.lm.request_timeout,
    ))
}

pub async fn compile(config: &PromptcConfig, task_path: &Path, data_path: &Path) -> Result<()> {
    let task = TaskFile::load(task_path)?;
    let signature = task.signature()?;
    let (train, validation) = split_dataset(load_rows(data_path)?)?;
    info!(
        "Compiling {} with {} training and {} validation rows",
        signature.display_string(),
        train.len(),
        validation.len()
    );

    let store = open_store(config);
    let task_model = build_model(&config.lm.model, &config.lm)?;
    let teacher_model = if config.lm.teacher_model() == config.lm.model {
        Arc::clone(&task_model)
    } else {
        build_model(config.lm.teacher_model(), &config.lm)?
    };

    let metric_config = task.metric_config();
    let mut factory = MetricFactory::new(Arc::clone(&store))
        .with_judge_lm(Arc::clone(&task_model))
        .with_request_timeout(config.lm.request_timeout);
    if metric_config.kind == MetricKind::CosineSimilarity {
        factory = factory.with_embeddings(build_embeddings(&config.lm)?);
    }
    let metric = factory.create(&metric_config).await?;

    let mut request = CompileRequest::new(
        signature,
        metric,
        ModelSet::new(task_model, teacher_model),
    )
    .with_module(task.module)
    .with_optimizer(task.optimizer)
    .with_data(train, validation);
    if let Some(hint) = &task.hint {
        request = request.with_hint(hint.clone());
    }

    let compiler = Compiler::new(config.clone()).with_logger(logger_from_config(&config.tracking));
    let token = compiler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling compilation");
            token.cancel();
        }
    });

    let result = compiler.compile(request).await?;

    let id = human_readable_id(
        &task.input_fields,
        &task.output_fields,
        task.module,
        &config.lm.model,
        task.optimizer,
        Utc::now().date_naive(),
    );
    let record = result.record(
        id.clone(),
        task.optimizer,
        &config.lm.model,
        config.lm.teacher_model(),
    );
    store.save(&record, &result.compiled_program).await?;

    println!("Program:     {}", id);
    println!("Baseline:    {:.4}", result.baseline_score);
    println!("Evaluation:  {:.4}", result.evaluation_score);
    match result.score_improvement.as_f64() {
        Some(change) => println!("Improvement: {:+.2}%", change * 100.0),
        None => println!("Improvement: undefined (zero baseline)"),
    }
    println!("Demos:       {}", result.compiled_program.demos.len());
    Ok(())
}

pub async fn run(config: &PromptcConfig, program: &str, inputs: Vec<(String, String)>) -> Result<()> {
    let stack = serving_stack(config)?;
    let row: Example = inputs.into_iter().collect();
    let trace = stack.runner.predict(program, row).await?;
    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}

pub async fn batch(
    config: &PromptcConfig,
    program: &str,
    data_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let stack = serving_stack(config)?;
    let rows = load_rows(data_path)?;
    let progress = |done: usize, total: usize| eprintln!("[{}/{}]", done, total);

    let result = stack.runner.run_batch(program, rows, Some(&progress)).await?;
    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} rows to {}", result.rows.len(), path.display());
        }
        None => println!("{}", json),
    }
    eprintln!(
        "{} of {} rows succeeded ({:.1}%)",
        result.stats.success_count,
        result.stats.total_rows,
        result.stats.success_rate() * 100.0
    );
    Ok(())
}

pub async fn programs(config: &PromptcConfig) -> Result<()> {
    let store = open_store(config);
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No programs in {}", config.store.root.display());
        return Ok(());
    }
    for id in ids {
        match store.load_record(&id).await {
            Ok(record) => println!(
                "{}  {}  {}  score={}",
                id,
                record.signature,
                record.module,
                record
                    .evaluation_score
                    .map(|s| format!("{:.4}", s))
                    .unwrap_or_else(|| "-".to_string())
            ),
            Err(e) => warn!("Skipping {}: {}", id, e),
        }
    }
    Ok(())
}
