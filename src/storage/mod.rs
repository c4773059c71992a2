mod piece;
mod store;
mod writer;

pub use piece::VerifiedPiece;
pub use store::PieceStore;
pub use writer::FileWriter;
