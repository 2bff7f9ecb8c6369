// --- Файл: src/serialization/mod.rs ---

//! Сериализация весов и метаданных обучения.
//!
//! - **SafeTensors**: бинарный формат для весов модели
//! - **Checkpoint**: веса + `checkpoint.json` с эпохой и значением метрики
//!
//! # Примеры
//!
//! ```rust,ignore
//! use machinedesign::serialization::{save_safetensors, load_safetensors};
//!
//! save_safetensors("model.safetensors", &model.parameters())?;
//! let loaded = load_safetensors("model.safetensors")?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{
    load_checkpoint, load_checkpoint_meta, save_checkpoint, Checkpoint, CheckpointError,
    CheckpointMeta, CHECKPOINT_FILE, WEIGHTS_FILE,
};
pub use safetensors_io::{
    load_safetensors, load_tensor, save_safetensors, tensor_info, SafeTensorsError,
};
