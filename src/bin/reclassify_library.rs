use anyhow::Result;
use btl_quiz::{config::Config, ClassifierFactory, Question, QuestionBank};
use std::env;

#[derive(Debug, Default)]
struct ReclassifyStats {
    total_questions: usize,
    candidates: usize,
    changed: usize,
    errors: Vec<String>,
}

impl ReclassifyStats {
    fn print_summary(&self, dry_run: bool) {
        println!("\n=== Reclassification Summary ===");
        println!("Total questions examined: {}", self.total_questions);
        println!("Questions considered: {}", self.candidates);

        if dry_run {
            println!("Labels that WOULD change: {}", self.changed);
            println!("\n** DRY RUN MODE - The library file was not modified **");
        } else {
            println!("Labels changed: {}", self.changed);
        }

        if !self.errors.is_empty() {
            println!("Errors encountered: {}", self.errors.len());
            for error in &self.errors {
                println!("  - {}", error);
            }
        }
    }
}

fn needs_label(question: &Question, all: bool) -> bool {
    all || question.predicted_btl.is_none()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let all = args.iter().any(|a| a == "--all");

    println!("=== BTL Library Reclassification Tool ===");
    if dry_run {
        println!("** RUNNING IN DRY-RUN MODE **");
    } else {
        println!("** LIVE MODE - The library file will be rewritten **");
    }

    let config = Config::from_env()?;
    let classifier = ClassifierFactory::create(&config.classifier)?;
    let bank = QuestionBank::open(&config.library.path).await?;
    println!("\nLibrary: {}", bank.path().display());
    println!("Classifier: {}", classifier.name());

    let mut questions = bank.snapshot().await.all().to_vec();

    let mut stats = ReclassifyStats {
        total_questions: questions.len(),
        ..Default::default()
    };

    for question in questions.iter_mut().filter(|q| needs_label(q, all)) {
        stats.candidates += 1;
        match classifier.classify(&question.text).await {
            Ok(label) if Some(label) != question.predicted_btl => {
                println!("  {}: {:?} -> {}", question.id, question.predicted_btl, label);
                question.predicted_btl = Some(label);
                stats.changed += 1;
            }
            Ok(_) => {}
            Err(e) => stats.errors.push(format!("{}: {}", question.id, e)),
        }
    }

    if !dry_run && stats.changed > 0 {
        bank.replace_all(questions).await?;
        println!("\n✓ Library updated");
    }

    stats.print_summary(dry_run);
    Ok(())
}
