mod demo_scenes;

use demo_scenes::SpriteField;

fn main() {
    if let Err(err) = wgpu_sprites::run(Box::new(SpriteField::default())) {
        eprintln!("Application error: {err}");
        std::process::exit(1);
    }
}
