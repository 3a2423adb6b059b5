use image_reflector::crd::{ImagePolicy, ImageRepository};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&ImageRepository::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&ImagePolicy::crd())?);
    Ok(())
}
