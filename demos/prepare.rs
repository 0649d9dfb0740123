use hatgen::{prepare_with_fallback, AvatarCompositor, Config, ImageAsset, Session, Status};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match dotenv::dotenv() {
        Ok(_) => log::info!("✅ .env file loaded"),
        Err(_) => log::warn!("⚠️  No .env file found"),
    }
    hatgen::logger::init()?;

    let input = env::args().nth(1).ok_or("usage: prepare <IMAGE> [--generate]")?;
    let generate = env::args().any(|arg| arg == "--generate");
    let config = Config::from_env();

    let image = ImageAsset::load(&input).await?;
    let padded = prepare_with_fallback(Arc::new(AvatarCompositor::default()), &image).await;
    let extension = padded.mime_type().trim_start_matches("image/");
    let padded_path = config.output_dir.join(format!("padded-avatar.{}", extension));
    tokio::fs::write(&padded_path, padded.bytes()).await?;
    println!(
        "{}x{} -> {}x{} ({})",
        image.width(),
        image.height(),
        padded.width(),
        padded.height(),
        padded_path.display()
    );

    if generate {
        let mut session = Session::from_config(&config)?;
        session.select_image(image);
        match session.generate(None).await {
            Status::Success(result) => {
                let path = result.save_to_dir(&config.output_dir).await?;
                println!("{}", path.display());
            }
            status => println!("{:?}", status),
        }
    }

    Ok(())
}
