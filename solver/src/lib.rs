//! Training orchestration for emotion and speech driven face synthesis: a conditional GAN
//! solver and an audio to latent solver built on top of `machine_learning`.

pub mod audio;
pub mod cadence;
pub mod config;
pub mod data;
pub mod decoder;
pub mod error;
pub mod gan;
pub mod gan_loss;
pub mod imaging;
pub mod lr_schedule;
pub mod metrics;
pub mod models;
pub mod perceptual;
pub mod tracking;
pub mod video;

pub use error::{Result, SolverErr};
