pub mod aranet4;
