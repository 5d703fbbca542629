pub mod audio;
pub mod health;
pub mod images;
pub mod openai;
