use crowdlabel::train::Trainer;
use crowdlabel::{
    baseline, ClassifierParams, Corpus, LabelModel, MatrixBuilder, SoftmaxClassifier, Split,
};

const VOTES: &str = "item_id\tworker_id\tlabel\ttext
t1\tw1\tpositive\tLovely sunny morning #bliss
t1\tw2\tpositive
t1\tw3\tneutral
t2\tw1\tnegative\tStuck in the storm again, soaked
t2\tw2\tnegative
t2\tw3\tnegative
t3\tw1\tpositive\tSunshine all afternoon, love it
t3\tw2\tneutral
t3\tw3\tpositive
t4\tw1\tneutral\tCloudy with a chance of rain
t4\tw2\tneutral
t4\tw3\tnegative
t5\tw1\tnegative\tCold rain ruined the picnic
t5\tw3\tnegative
t6\tw2\tpositive\tWarm and sunny, perfect day @beach
t6\tw3\tpositive
t7\tw1\tneutral\tForecast says clouds tomorrow
t7\tw2\tneutral
t8\tw1\tnegative\tFreezing wind and storm warnings
t8\tw2\tpositive
t8\tw3\tnegative
";

const GOLD: &str = "item_id\tlabel\tvalid
t1\tpositive\t1
t2\tnegative\t1
t3\tpositive\t1
t4\tneutral\t1
t5\tnegative\t1
t6\tpositive\t1
t7\tneutral\t0
t8\tnegative\t1
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("Crowd Label Aggregation Example");
    println!("===============================\n");

    let mut corpus = Corpus::new();
    let num_votes = corpus.read_votes(VOTES.as_bytes())?;
    corpus.read_gold(GOLD.as_bytes())?;
    let excluded = corpus.restrict_to_gold();
    corpus.assign_splits(0.0, 0.25, 7)?;
    println!("Read {} votes, excluded {} items without gold\n", num_votes, excluded);

    let labels = corpus.label_set();
    println!("Classes:");
    for (name, code) in labels.iter() {
        println!("  {} = {}", code, name);
    }

    let builder = MatrixBuilder::new(&labels);
    let train = builder.build(&corpus, Split::Train)?;
    let test = builder.build(&corpus, Split::Test)?;
    println!(
        "\nTrain matrix: {} items x {} workers, {} votes",
        train.num_items(),
        train.num_workers(),
        train.num_votes()
    );

    // Fit the generative model
    let mut trainer = Trainer::lbfgs().with_cardinality(labels.len())?;
    trainer.verbose(true);
    trainer.set("reg_param", "0.01")?;
    trainer.set("epochs", "50")?;
    let model = trainer.train(&train)?.with_labels(labels.clone())?;

    println!("\nEstimated worker accuracies:");
    for ((worker, _), accuracy) in model.workers().iter().zip(model.worker_accuracies()) {
        println!("  {}: {:.3}", worker, accuracy);
    }

    println!("\nMarginals (train):");
    let marginals = model.marginals(&train)?;
    for (row, probs) in marginals.outer_iter().enumerate() {
        println!("  {}: {:.3}", train.item_id(row).unwrap_or("?"), probs);
    }

    let gold = corpus.gold_codes(&train, &labels);
    println!("\nTrain accuracy:");
    println!("  label model:      {:.3}", model.score(&train, &gold)?.accuracy);
    println!(
        "  majority vote:    {:.3}",
        baseline::majority_vote_accuracy(&train, &gold)?
    );
    if let Some(average) = baseline::average_worker_accuracy(&train, &gold)? {
        println!("  average worker:   {:.3}", average);
    }

    // Round-trip through a model file
    let model_path = std::env::temp_dir().join("crowd_pipeline.lblm");
    model.save(&model_path)?;
    let loaded = LabelModel::from_bytes(&std::fs::read(&model_path)?)?;

    // Train the downstream classifier on soft labels
    let texts = corpus.texts(&train);
    let mut params = ClassifierParams::default();
    params.set_c2(0.5)?;
    let clf = SoftmaxClassifier::fit(&texts, &marginals, &params)?;

    let test_texts = corpus.texts(&test);
    let test_gold: Vec<u32> = corpus.gold_codes(&test, &labels).into_iter().flatten().collect();
    println!("\nHeld-out items:");
    for (row, code) in loaded.predict(&test)?.into_iter().enumerate() {
        println!(
            "  {}: label model says {}",
            test.item_id(row).unwrap_or("?"),
            labels.name(code).unwrap_or("?")
        );
    }
    if test_texts.len() == test_gold.len() {
        println!(
            "  classifier accuracy: {:.3}",
            clf.score(&test_texts, &test_gold)?
        );
    }

    Ok(())
}
