use clap::{Parser, Subcommand};

/// permtoken: token-scoped permissions for HTTP APIs
#[derive(Parser)]
#[command(name = "permtoken", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to 8000)
        #[arg(short, long, env = "PERMTOKEN_PORT")]
        port: Option<u16>,

        /// Create this user (if missing) and a token holding every catalog
        /// permission, printing the key once. Useful with the in-memory backend.
        #[arg(long)]
        bootstrap_user: Option<String>,
    },

    /// Manage users that own tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage tokens and their permissions
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect the permission catalog
    Permission {
        #[command(subcommand)]
        command: PermissionCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// List users
    List,
    /// Mark a user inactive; their tokens stop authenticating
    Deactivate { username: String },
    /// Re-activate a user
    Activate { username: String },
    /// Delete a user and every token they own
    Delete { username: String },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a token for a user
    Create {
        #[arg(long)]
        username: String,
        /// Use this key instead of generating one
        #[arg(long)]
        key: Option<String>,
        /// Permission codes to grant, e.g. auth.add_user,auth.change_user
        #[arg(long, value_delimiter = ',')]
        permissions: Option<Vec<String>>,
    },
    /// Grant permissions to a token
    Grant {
        key: String,
        #[arg(value_delimiter = ',', required = true)]
        permissions: Vec<String>,
    },
    /// Revoke permissions from a token
    Revoke {
        key: String,
        #[arg(value_delimiter = ',', required = true)]
        permissions: Vec<String>,
    },
    /// Show a token's owner and permissions
    Show { key: String },
    /// List a user's tokens
    List {
        #[arg(long)]
        username: String,
    },
    /// Delete a token
    Delete { key: String },
}

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// List every permission code in the catalog
    List,
}
